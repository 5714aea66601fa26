//! In-memory storage backend
//!
//! Backs every worker test and suits embedding hosts that hold their
//! cache in process memory. A handle opened from a store that is later
//! wholesale-deleted keeps writing to its detached map; reopening by
//! name yields the fresh (empty) store, matching browser cache handle
//! semantics.

use crate::store::{CacheStorage, Store, StoreHandle, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type EntryMap = Arc<RwLock<HashMap<String, Vec<u8>>>>;

/// In-memory implementation of the host storage capability
#[derive(Clone, Default)]
pub struct MemoryStorage {
    stores: Arc<RwLock<HashMap<String, EntryMap>>>,
}

impl MemoryStorage {
    /// Create an empty storage namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stores currently present (test introspection)
    pub fn store_count(&self) -> usize {
        self.stores.read().unwrap().len()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("stores", &self.store_count())
            .finish()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> StoreResult<StoreHandle> {
        let entries = {
            let mut stores = self.stores.write().unwrap();
            stores.entry(name.to_string()).or_default().clone()
        };
        Ok(Box::new(MemoryStore { entries }))
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        self.stores.write().unwrap().remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.stores.read().unwrap().contains_key(name))
    }
}

/// Handle onto one named in-memory store
struct MemoryStore {
    entries: EntryMap,
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, blob: Vec<u8>) -> StoreResult<()> {
        self.entries.write().unwrap().insert(key.to_string(), blob);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.write().unwrap().remove(key).is_some())
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().unwrap().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
