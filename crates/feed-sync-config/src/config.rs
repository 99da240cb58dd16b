use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub trakt: TraktConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub publish: Option<PublishConfig>,
    #[serde(default)]
    pub secrets: Option<SecretsConfig>,
    #[serde(default)]
    pub playlists: Option<PlaylistConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TraktConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Number of history entries requested per run
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    /// Calendar lookahead window in days
    #[serde(default = "default_calendar_days")]
    pub calendar_days: u32,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Base for the canonical item URLs written into the feed
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_refresh_interval_minutes")]
    pub refresh_interval_minutes: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PublishConfig {
    pub gist_id: String,
    #[serde(default = "default_gist_filename")]
    pub filename: String,
}

/// Where refreshed Trakt tokens are written back (GitHub Actions secrets)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SecretsConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_access_token_secret")]
    pub access_token_secret: String,
    #[serde(default = "default_refresh_token_secret")]
    pub refresh_token_secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlaylistConfig {
    /// Same-origin relay in front of the music API
    pub relay_url: String,
    #[serde(default = "default_max_refresh_attempts")]
    pub max_refresh_attempts: u32,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_history_limit() -> u32 {
    100
}

fn default_calendar_days() -> u32 {
    14
}

fn default_api_url() -> String {
    "https://api.trakt.tv".to_string()
}

fn default_site_url() -> String {
    "https://trakt.tv".to_string()
}

fn default_max_items() -> usize {
    30
}

fn default_refresh_interval_minutes() -> u64 {
    60
}

fn default_gist_filename() -> String {
    "watch-history.json".to_string()
}

fn default_access_token_secret() -> String {
    "TRAKT_ACCESS_TOKEN".to_string()
}

fn default_refresh_token_secret() -> String {
    "TRAKT_REFRESH_TOKEN".to_string()
}

fn default_max_refresh_attempts() -> u32 {
    3
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_retry_max_delay_ms() -> u64 {
    4000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            refresh_interval_minutes: default_refresh_interval_minutes(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Config {
    /// Starting point written by `rewind config init`
    pub fn template() -> Self {
        Self {
            trakt: TraktConfig {
                client_id: "YOUR_CLIENT_ID".to_string(),
                client_secret: "YOUR_CLIENT_SECRET".to_string(),
                history_limit: default_history_limit(),
                calendar_days: default_calendar_days(),
                api_url: default_api_url(),
                site_url: default_site_url(),
            },
            feed: FeedConfig::default(),
            publish: Some(PublishConfig {
                gist_id: "YOUR_GIST_ID".to_string(),
                filename: default_gist_filename(),
            }),
            secrets: None,
            playlists: None,
        }
    }

    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.is_trakt_configured() {
            return Err(anyhow::anyhow!("trakt.client_id and trakt.client_secret must be configured"));
        }
        if self.trakt.history_limit == 0 {
            return Err(anyhow::anyhow!("trakt.history_limit must be greater than zero"));
        }
        if self.feed.max_items == 0 {
            return Err(anyhow::anyhow!("feed.max_items must be greater than zero"));
        }
        if self.feed.refresh_interval_minutes == 0 {
            return Err(anyhow::anyhow!("feed.refresh_interval_minutes must be greater than zero"));
        }
        if let Some(publish) = &self.publish {
            if publish.gist_id.is_empty() || publish.gist_id == "YOUR_GIST_ID" {
                return Err(anyhow::anyhow!("publish.gist_id is not configured"));
            }
        }
        if let Some(playlists) = &self.playlists {
            if playlists.relay_url.is_empty() {
                return Err(anyhow::anyhow!("playlists.relay_url cannot be empty"));
            }
            if playlists.retry.max_attempts == 0 {
                return Err(anyhow::anyhow!("playlists.retry.max_attempts must be at least 1"));
            }
            if playlists.retry.base_delay_ms > playlists.retry.max_delay_ms {
                return Err(anyhow::anyhow!("playlists.retry.base_delay_ms cannot exceed max_delay_ms"));
            }
        }
        Ok(())
    }

    pub fn is_trakt_configured(&self) -> bool {
        !self.trakt.client_id.is_empty()
            && self.trakt.client_id != "YOUR_CLIENT_ID"
            && !self.trakt.client_secret.is_empty()
            && self.trakt.client_secret != "YOUR_CLIENT_SECRET"
    }
}
