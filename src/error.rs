//! Error types for shellcache
//!
//! All modules use `WorkerResult<T>` as their return type.

use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// All errors that can occur in the cache worker
#[derive(Error, Debug)]
pub enum WorkerError {
    // Network errors
    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    // Install errors
    #[error("Install failed while priming shell resource {resource}")]
    InstallFailed {
        resource: String,
        #[source]
        source: Box<WorkerError>,
    },

    // Control channel errors
    #[error("Offline prefetch aborted at {resource}; remaining resources were not fetched")]
    PrefetchAborted {
        resource: String,
        #[source]
        source: Box<WorkerError>,
    },

    // Storage errors
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Corrupt cache entry under {key}: {reason}")]
    EntryDecode { key: String, reason: String },

    // Manifest errors
    #[error("Invalid resource manifest: {reason}")]
    ManifestInvalid { reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // Lifecycle errors
    #[error("Invalid worker state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    /// Create a fetch error for a request URL
    pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create an entry decode error
    pub fn entry_decode(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EntryDecode {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a manifest validation error
    pub fn manifest_invalid(reason: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            reason: reason.into(),
        }
    }

    /// Whether this error came from the network rather than local state.
    ///
    /// Network errors are expected while offline; storage and manifest
    /// errors indicate the cache itself cannot be trusted.
    pub fn is_network(&self) -> bool {
        match self {
            Self::Fetch { .. } => true,
            Self::InstallFailed { source, .. } | Self::PrefetchAborted { source, .. } => {
                source.is_network()
            }
            _ => false,
        }
    }
}
