//! Named key/blob store capability
//!
//! The host runtime provides named, independently addressable stores with
//! per-key atomic get/put/delete/list plus whole-store deletion. No
//! cross-key transaction is guaranteed or required; the lifecycle
//! protocol is built on per-key atomicity alone.
//!
//! Two backends ship with the crate: [`MemoryStorage`] for tests and
//! embedding hosts, and [`FsStorage`] for durable on-disk caches.

pub mod fs;
pub mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

use crate::config::StoreNames;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// An opened named store
pub type StoreHandle = Box<dyn Store>;

/// Errors raised by store backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt entry in store {store}: {reason}")]
    Corrupt { store: String, reason: String },
}

impl StoreError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a corrupt-entry error
    pub fn corrupt(store: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            store: store.into(),
            reason: reason.into(),
        }
    }
}

/// A single named store: key -> blob with per-key atomic operations
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the blob stored under a key
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write a blob under a key, replacing any previous value
    async fn put(&self, key: &str, blob: Vec<u8>) -> StoreResult<()>;

    /// Delete the entry under a key; returns whether an entry existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// List every key currently present
    async fn keys(&self) -> StoreResult<Vec<String>>;
}

/// The host storage capability: a namespace of named stores
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a store by name, creating it if absent
    async fn open(&self, name: &str) -> StoreResult<StoreHandle>;

    /// Delete a whole store and its entries; absent stores are a no-op
    async fn delete(&self, name: &str) -> StoreResult<()>;

    /// Whether a store with this name currently exists
    async fn exists(&self, name: &str) -> StoreResult<bool>;
}

/// Handle bundle for the worker's three stores.
///
/// Injected everywhere a component needs storage, so the lifecycle
/// protocol can run against any [`CacheStorage`] implementation.
#[derive(Clone)]
pub struct StoreSet {
    storage: Arc<dyn CacheStorage>,
    names: StoreNames,
}

impl StoreSet {
    /// Bundle a storage capability with the configured store names
    pub fn new(storage: Arc<dyn CacheStorage>, names: StoreNames) -> Self {
        Self { storage, names }
    }

    /// The configured store names
    pub fn names(&self) -> &StoreNames {
        &self.names
    }

    /// Open the transient install staging store
    pub async fn temp(&self) -> StoreResult<StoreHandle> {
        self.storage.open(&self.names.temp).await
    }

    /// Open the durable content store
    pub async fn content(&self) -> StoreResult<StoreHandle> {
        self.storage.open(&self.names.content).await
    }

    /// Open the manifest metadata store
    pub async fn meta(&self) -> StoreResult<StoreHandle> {
        self.storage.open(&self.names.meta).await
    }

    /// Delete the staging store
    pub async fn delete_temp(&self) -> StoreResult<()> {
        self.storage.delete(&self.names.temp).await
    }

    /// Delete the content store
    pub async fn delete_content(&self) -> StoreResult<()> {
        self.storage.delete(&self.names.content).await
    }

    /// Delete the metadata store
    pub async fn delete_meta(&self) -> StoreResult<()> {
        self.storage.delete(&self.names.meta).await
    }

    /// Delete all three stores. Used by the activation failure branch.
    pub async fn reset_all(&self) -> StoreResult<()> {
        self.delete_content().await?;
        self.delete_temp().await?;
        self.delete_meta().await?;
        Ok(())
    }
}

impl std::fmt::Debug for StoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSet")
            .field("temp", &self.names.temp)
            .field("content", &self.names.content)
            .field("meta", &self.names.meta)
            .finish()
    }
}
