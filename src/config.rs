//! Configuration for lamad-progress

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lamad-progress")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for the progression database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Passing fraction for post-assessments (score / max_score)
    #[serde(default = "default_passing_threshold")]
    pub passing_threshold: f64,

    /// Session snapshot time-to-live in seconds
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Maximum cached session snapshots before expired entries are purged
    #[serde(default = "default_session_max_entries")]
    pub session_max_entries: usize,

    /// Broadcast capacity of the progress event bus
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_passing_threshold() -> f64 {
    0.8
}

fn default_session_ttl() -> u64 {
    1800
}

fn default_session_max_entries() -> usize {
    10_000
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            passing_threshold: default_passing_threshold(),
            session_ttl_secs: default_session_ttl(),
            session_max_entries: default_session_max_entries(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
