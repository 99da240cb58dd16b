use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

const TRAKT_ACCESS_TOKEN: &str = "trakt_access_token";
const TRAKT_REFRESH_TOKEN: &str = "trakt_refresh_token";
const TRAKT_TOKEN_EXPIRES: &str = "trakt_token_expires";
const GITHUB_TOKEN: &str = "github_token";
const PLAYLIST_ACCESS_TOKEN: &str = "playlist_access_token";

const KNOWN_KEYS: [&str; 5] = [
    TRAKT_ACCESS_TOKEN,
    TRAKT_REFRESH_TOKEN,
    TRAKT_TOKEN_EXPIRES,
    GITHUB_TOKEN,
    PLAYLIST_ACCESS_TOKEN,
];

#[derive(Debug, Serialize, Deserialize, Default)]
struct CredentialsData {
    #[serde(flatten)]
    data: HashMap<String, String>,
}

pub struct CredentialStore {
    path: PathBuf,
    credentials: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            credentials: HashMap::new(),
        }
    }

    /// Load the credentials file. A file that no longer parses is treated
    /// as empty so a corrupted token bundle never blocks a run.
    pub fn load(&mut self) -> Result<()> {
        if self.path.exists() {
            let content = std::fs::read_to_string(&self.path)?;
            match toml::from_str::<CredentialsData>(&content) {
                Ok(creds_data) => self.credentials = creds_data.data,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Credentials file is malformed, ignoring it"
                    );
                    self.credentials.clear();
                }
            }
        }
        Ok(())
    }

    /// Overlay `REWIND_<KEY>` environment variables on top of the file values
    pub fn apply_env_overrides(&mut self) {
        for key in KNOWN_KEYS {
            let var = format!("REWIND_{}", key.to_uppercase());
            if let Ok(value) = std::env::var(&var) {
                if !value.is_empty() {
                    self.credentials.insert(key.to_string(), value);
                }
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let creds_data = CredentialsData {
            data: self.credentials.clone(),
        };
        let content = toml::to_string_pretty(&creds_data)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.credentials.get(key)
    }

    pub fn set(&mut self, key: String, value: String) {
        self.credentials.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.credentials.remove(key);
    }

    pub fn get_trakt_access_token(&self) -> Option<&String> {
        self.get(TRAKT_ACCESS_TOKEN)
    }

    pub fn set_trakt_access_token(&mut self, token: String) {
        self.set(TRAKT_ACCESS_TOKEN.to_string(), token);
    }

    pub fn get_trakt_refresh_token(&self) -> Option<&String> {
        self.get(TRAKT_REFRESH_TOKEN)
    }

    pub fn set_trakt_refresh_token(&mut self, token: String) {
        self.set(TRAKT_REFRESH_TOKEN.to_string(), token);
    }

    pub fn get_trakt_token_expires(&self) -> Option<DateTime<Utc>> {
        self.get(TRAKT_TOKEN_EXPIRES)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn set_trakt_token_expires(&mut self, expires: DateTime<Utc>) {
        self.set(TRAKT_TOKEN_EXPIRES.to_string(), expires.to_rfc3339());
    }

    pub fn get_github_token(&self) -> Option<&String> {
        self.get(GITHUB_TOKEN)
    }

    pub fn set_github_token(&mut self, token: String) {
        self.set(GITHUB_TOKEN.to_string(), token);
    }

    pub fn get_playlist_access_token(&self) -> Option<&String> {
        self.get(PLAYLIST_ACCESS_TOKEN)
    }

    pub fn set_playlist_access_token(&mut self, token: String) {
        self.set(PLAYLIST_ACCESS_TOKEN.to_string(), token);
    }

    pub fn get_all_keys(&self) -> Vec<String> {
        self.credentials.keys().cloned().collect()
    }
}
