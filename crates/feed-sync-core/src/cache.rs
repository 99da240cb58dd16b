use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory of JSON documents addressed by key.
///
/// A file that fails to parse is deleted and reported as a miss.
#[derive(Debug, Clone)]
pub struct JsonCache {
    dir: PathBuf,
}

impl JsonCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!("Cache miss: {} (file does not exist)", key);
            return None;
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read cache file for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => {
                debug!("Cache hit: {}", key);
                Some(value)
            }
            Err(e) => {
                warn!("Cache corruption detected for {}: {}. Deleting corrupted file.", key, e);
                if let Err(rm_err) = std::fs::remove_file(&path) {
                    warn!("Failed to delete corrupted cache file: {}", rm_err);
                }
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key);
        let json = serde_json::to_string_pretty(value).map_err(|e| anyhow!("Failed to serialize cache: {}", e))?;
        std::fs::write(&path, json).map_err(|e| anyhow!("Failed to write cache {}: {}", key, e))?;
        debug!("Cache saved: {}", key);
        Ok(())
    }

    /// Returns whether an entry was removed
    pub fn evict(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        debug!("Cache evicted: {}", key);
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        std::fs::create_dir_all(&self.dir)?;
        info!("Cleared cache directory: {:?}", self.dir);
        Ok(())
    }
}
