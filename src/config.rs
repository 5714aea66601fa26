//! Worker configuration
//!
//! A deployment ships a small `worker.toml` next to the resource manifest
//! describing the origin the worker serves and the names of its three
//! cache stores. Everything except the origin has a sensible default.

use crate::error::{WorkerError, WorkerResult};
use serde::Deserialize;
use std::path::Path;

/// Default query parameter stripped during request-key normalization
const DEFAULT_CACHE_BUST_PARAM: &str = "v";

/// Parsed worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Origin this worker serves, e.g. `https://app.example.com`.
    /// Stored without a trailing slash.
    pub origin: String,

    /// Cache-busting query parameter name (requests carrying `?<param>=...`
    /// are keyed by the bare path)
    #[serde(default = "default_cache_bust_param")]
    pub cache_bust_param: String,

    /// Store names
    #[serde(default)]
    pub stores: StoreNames,
}

fn default_cache_bust_param() -> String {
    DEFAULT_CACHE_BUST_PARAM.to_string()
}

/// Names of the three named cache stores
#[derive(Debug, Clone, Deserialize)]
pub struct StoreNames {
    /// Transient staging store populated during install
    #[serde(default = "default_temp")]
    pub temp: String,

    /// Durable servable cache
    #[serde(default = "default_content")]
    pub content: String,

    /// Single-record manifest metadata store
    #[serde(default = "default_meta")]
    pub meta: String,
}

fn default_temp() -> String {
    "temp-cache".to_string()
}

fn default_content() -> String {
    "content-cache".to_string()
}

fn default_meta() -> String {
    "manifest-meta".to_string()
}

impl Default for StoreNames {
    fn default() -> Self {
        Self {
            temp: default_temp(),
            content: default_content(),
            meta: default_meta(),
        }
    }
}

impl WorkerConfig {
    /// Create a configuration with defaults for the given origin
    pub fn new(origin: impl Into<String>) -> WorkerResult<Self> {
        let config = Self {
            origin: origin.into(),
            cache_bust_param: default_cache_bust_param(),
            stores: StoreNames::default(),
        };
        config.validated("worker.toml")
    }

    /// Parse a configuration from a TOML file on disk
    pub async fn from_file(path: &Path) -> WorkerResult<Self> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| WorkerError::ConfigInvalid {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
        Self::parse_at(&content, path)
    }

    /// Parse a configuration from a TOML string
    pub fn parse(content: &str) -> WorkerResult<Self> {
        Self::parse_at(content, Path::new("worker.toml"))
    }

    fn parse_at(content: &str, path: &Path) -> WorkerResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| WorkerError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validated(path)
    }

    fn validated(mut self, path: impl Into<std::path::PathBuf>) -> WorkerResult<Self> {
        while self.origin.ends_with('/') {
            self.origin.pop();
        }
        if self.origin.is_empty() {
            return Err(WorkerError::ConfigInvalid {
                path: path.into(),
                reason: "origin must not be empty".to_string(),
            });
        }
        if self.cache_bust_param.is_empty() {
            return Err(WorkerError::ConfigInvalid {
                path: path.into(),
                reason: "cache_bust_param must not be empty".to_string(),
            });
        }
        Ok(self)
    }
}
