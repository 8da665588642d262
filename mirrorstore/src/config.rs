use crate::errors::{MirrorError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_EVERY: usize = 25;

#[derive(Deserialize, Debug, Clone)]
pub struct MirrorConfig {
    pub catalog_path: PathBuf,
    /// Tables processed between two heartbeats.
    #[serde(default = "default_heartbeat_every")]
    pub heartbeat_every: usize,
    #[serde(default = "default_indexer_timeout_ms")]
    pub indexer_timeout_ms: u64,
    #[serde(default = "default_indexer_max_attempts")]
    pub indexer_max_attempts: u32,
    #[serde(default = "default_indexer_retry_backoff_ms")]
    pub indexer_retry_backoff_ms: u64,
}

fn default_heartbeat_every() -> usize {
    DEFAULT_HEARTBEAT_EVERY
}

fn default_indexer_timeout_ms() -> u64 {
    30_000
}

fn default_indexer_max_attempts() -> u32 {
    3
}

fn default_indexer_retry_backoff_ms() -> u64 {
    200
}

impl MirrorConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            catalog_path: base_path.join("mirror.sqlite"),
            heartbeat_every: default_heartbeat_every(),
            indexer_timeout_ms: default_indexer_timeout_ms(),
            indexer_max_attempts: default_indexer_max_attempts(),
            indexer_retry_backoff_ms: default_indexer_retry_backoff_ms(),
        }
    }

    /// Loads a JSON config file. Relative catalog paths resolve against the file's directory.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: MirrorConfig = serde_json::from_str(&raw)?;
        if config.catalog_path.is_relative() {
            if let Some(dir) = path.parent() {
                config.catalog_path = dir.join(&config.catalog_path);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_every == 0 {
            return Err(MirrorError::Config(
                "heartbeat_every must be greater than zero".to_string(),
            ));
        }
        if self.indexer_max_attempts == 0 {
            return Err(MirrorError::Config(
                "indexer_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn indexer_timeout(&self) -> Duration {
        Duration::from_millis(self.indexer_timeout_ms)
    }

    pub fn indexer_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.indexer_retry_backoff_ms)
    }
}
