use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the application API; relative queued URLs and the
    /// health probe are resolved against it.
    pub api_base: String,
    pub health_path: String,
    pub probe_interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Give up on a mutation (as a lost write) after this many transient
    /// failures. `None` retries until the backend answers.
    pub max_attempts: Option<u32>,
    pub max_entries: Option<usize>,
    pub auth_token: Option<String>,
    pub storage: StorageConfig,
    pub document: DocumentBackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    #[serde(rename = "sled")]
    Sled { data_dir: String },
    #[serde(rename = "memory")]
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentBackendConfig {
    /// REST endpoint of the document backend, e.g. `http://host/v1`.
    pub endpoint: String,
    pub database_id: String,
    /// Sent as `X-Project-Id` when set.
    pub project_id: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sled {
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for DocumentBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000/v1".to_string(),
            database_id: "main".to_string(),
            project_id: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:5000".to_string(),
            health_path: "/health".to_string(),
            probe_interval_secs: 10,
            probe_timeout_ms: 5_000,
            request_timeout_ms: 15_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 15_000,
            max_attempts: None,
            max_entries: None,
            auth_token: None,
            storage: StorageConfig::default(),
            document: DocumentBackendConfig::default(),
        }
    }
}

impl Config {
    /// Read a JSON config file. Missing fields fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply `CAMPUS_SYNC_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overrides read through `lookup`:
    ///
    /// - `CAMPUS_SYNC_API_BASE`, `CAMPUS_SYNC_DATA_DIR` (switches to sled),
    ///   `CAMPUS_SYNC_AUTH_TOKEN`
    /// - `CAMPUS_SYNC_DOCUMENT_ENDPOINT`, `CAMPUS_SYNC_DATABASE_ID`,
    ///   `CAMPUS_SYNC_PROJECT_ID`
    /// - positive integers: `CAMPUS_SYNC_PROBE_INTERVAL_SECS`,
    ///   `CAMPUS_SYNC_PROBE_TIMEOUT_MS`, `CAMPUS_SYNC_REQUEST_TIMEOUT_MS`,
    ///   `CAMPUS_SYNC_BACKOFF_BASE_MS`, `CAMPUS_SYNC_BACKOFF_MAX_MS`,
    ///   `CAMPUS_SYNC_MAX_ATTEMPTS`, `CAMPUS_SYNC_MAX_ENTRIES`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CAMPUS_SYNC_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = lookup("CAMPUS_SYNC_DATA_DIR") {
            self.storage = StorageConfig::Sled { data_dir: v };
        }
        if let Some(v) = lookup("CAMPUS_SYNC_AUTH_TOKEN") {
            self.auth_token = Some(v);
        }
        if let Some(v) = lookup("CAMPUS_SYNC_DOCUMENT_ENDPOINT") {
            self.document.endpoint = v;
        }
        if let Some(v) = lookup("CAMPUS_SYNC_DATABASE_ID") {
            self.document.database_id = v;
        }
        if let Some(v) = lookup("CAMPUS_SYNC_PROJECT_ID") {
            self.document.project_id = Some(v);
        }
        if let Some(v) = lookup("CAMPUS_SYNC_PROBE_INTERVAL_SECS") {
            self.probe_interval_secs = parse_positive("CAMPUS_SYNC_PROBE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("CAMPUS_SYNC_MAX_ATTEMPTS") {
            self.max_attempts =
                Some(parse_positive("CAMPUS_SYNC_MAX_ATTEMPTS", &v)? as u32);
        }
        if let Some(v) = lookup("CAMPUS_SYNC_PROBE_TIMEOUT_MS") {
            self.probe_timeout_ms = parse_positive("CAMPUS_SYNC_PROBE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("CAMPUS_SYNC_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_positive("CAMPUS_SYNC_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("CAMPUS_SYNC_BACKOFF_BASE_MS") {
            self.backoff_base_ms = parse_positive("CAMPUS_SYNC_BACKOFF_BASE_MS", &v)?;
        }
        if let Some(v) = lookup("CAMPUS_SYNC_BACKOFF_MAX_MS") {
            self.backoff_max_ms = parse_positive("CAMPUS_SYNC_BACKOFF_MAX_MS", &v)?;
        }
        if let Some(v) = lookup("CAMPUS_SYNC_MAX_ENTRIES") {
            self.max_entries = Some(parse_positive("CAMPUS_SYNC_MAX_ENTRIES", &v)? as usize);
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Full URL of the health probe.
    pub fn health_url(&self) -> String {
        join_url(&self.api_base, &self.health_path)
    }

    /// Resolve a queued URL: absolute URLs are kept, paths are joined to
    /// the API base.
    pub fn resolve_url(&self, url: &str) -> String {
        resolve_url(&self.api_base, url)
    }
}

pub fn resolve_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        join_url(base, url)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn parse_positive(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
