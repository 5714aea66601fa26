//! Resource manifest and persisted install record
//!
//! The build step emits a manifest mapping every static resource path to
//! its content fingerprint, plus the ordered core-shell subset that must
//! be cached before the application can boot. The worker treats the
//! manifest as a constant for its whole lifetime.
//!
//! After a successful activation the manifest is persisted as a
//! [`PersistedManifestRecord`] so the next worker generation can diff
//! against it and reuse unchanged entries instead of re-fetching them.

use crate::error::{WorkerError, WorkerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Manifest key aliasing the root document
pub const ROOT_KEY: &str = "/";

/// Well-known key the persisted record lives under inside the meta store
pub const RECORD_KEY: &str = "manifest";

/// Compute the content fingerprint of a resource body.
///
/// Fingerprints are opaque strings; the worker only ever compares them
/// for equality. This helper gives build steps and tests a real one.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Immutable mapping from resource path to content fingerprint,
/// plus the core-shell subset downloaded at install time.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceManifest {
    /// path -> fingerprint for every versioned resource
    resources: BTreeMap<String, String>,

    /// Ordered subset of resource paths required before first render
    core_shell: Vec<String>,
}

impl ResourceManifest {
    /// Build a manifest from its parts.
    ///
    /// Every core-shell entry must name a manifest path.
    pub fn new(
        resources: BTreeMap<String, String>,
        core_shell: Vec<String>,
    ) -> WorkerResult<Self> {
        for path in &core_shell {
            if !resources.contains_key(path) {
                return Err(WorkerError::manifest_invalid(format!(
                    "core shell entry '{}' is not a manifest resource",
                    path
                )));
            }
        }
        Ok(Self {
            resources,
            core_shell,
        })
    }

    /// Parse the build-step handoff format:
    /// `{ "resources": { path: fingerprint, ... }, "core_shell": [path, ...] }`
    pub fn from_json(content: &str) -> WorkerResult<Self> {
        let parsed: Self = serde_json::from_str(content)?;
        Self::new(parsed.resources, parsed.core_shell)
    }

    /// Fingerprint recorded for a resource path, if any
    pub fn fingerprint(&self, path: &str) -> Option<&str> {
        self.resources.get(path).map(String::as_str)
    }

    /// Whether the manifest names this resource path
    pub fn contains(&self, path: &str) -> bool {
        self.resources.contains_key(path)
    }

    /// All resource paths in the manifest
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// The core-shell subset, in install order
    pub fn core_shell(&self) -> &[String] {
        &self.core_shell
    }

    /// Number of resources in the manifest
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the manifest is empty
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Snapshot the path -> fingerprint table for persistence
    pub fn to_snapshot(&self) -> BTreeMap<String, String> {
        self.resources.clone()
    }
}

/// Snapshot of the manifest that was last fully installed.
///
/// Stored as JSON under [`RECORD_KEY`] in the meta store. The generation
/// tag identifies the activation that wrote it, so "prior manifest"
/// lookups are deterministic and independent of host scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedManifestRecord {
    /// Identity of the activation that wrote this record
    pub generation: Uuid,

    /// When the record was written
    pub installed_at: DateTime<Utc>,

    /// path -> fingerprint table of the installed manifest
    pub resources: BTreeMap<String, String>,
}

impl PersistedManifestRecord {
    /// Create a fresh record for the given manifest with a new generation tag
    pub fn for_manifest(manifest: &ResourceManifest) -> Self {
        Self {
            generation: Uuid::new_v4(),
            installed_at: Utc::now(),
            resources: manifest.to_snapshot(),
        }
    }

    /// Serialize for storage under [`RECORD_KEY`]
    pub fn encode(&self) -> WorkerResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a stored record
    pub fn decode(bytes: &[u8]) -> WorkerResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Fingerprint this record holds for a resource path, if any
    pub fn fingerprint(&self, path: &str) -> Option<&str> {
        self.resources.get(path).map(String::as_str)
    }
}
