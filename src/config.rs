use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Application configuration. Defaults suit a single-host deployment with
/// the database and lock token on the same shared volume; a TOML file can
/// override any section, and CLI flags override the file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub database_path: String,
    pub cors_origin: Option<String>,
    /// Upper bound on an upload request body, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5123,
            database_path: "soillab.db".to_string(),
            cors_origin: None,
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Well-known token path on the shared volume.
    pub path: PathBuf,
    /// How long a writer waits for the lock before reporting busy.
    pub timeout_secs: u64,
    /// A token older than this belongs to a dead holder and may be removed.
    pub max_age_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("soillab.lock"),
            timeout_secs: 10,
            max_age_secs: 300,
            poll_interval_ms: 500,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        toml::from_str(&content).with_context(|| format!("failed to parse config file {path}"))
    }
}
