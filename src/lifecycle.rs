//! Cache lifecycle: install-time shell priming and activate-time upgrade
//!
//! Install stages the core shell into the temp store with forced
//! revalidation. Activation diffs the content store against the previously
//! persisted manifest, deletes stale entries, promotes the staged shell
//! over whatever was retained, and persists the new manifest snapshot.
//! Any activation error collapses to a full reset of all three stores:
//! the worker still activates, but cold, and the router repopulates the
//! cache lazily. A cache that cannot be verified consistent is never
//! served from.

use crate::error::{WorkerError, WorkerResult};
use crate::manifest::{PersistedManifestRecord, ResourceManifest, RECORD_KEY};
use crate::net::{Fetcher, Request};
use crate::router::{origin_relative, resource_url};
use crate::store::{Store, StoreSet};
use futures_util::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives the install -> activate upgrade protocol over the three stores
pub struct LifecycleManager {
    stores: StoreSet,
    manifest: Arc<ResourceManifest>,
    fetcher: Arc<dyn Fetcher>,
    origin: String,
}

impl LifecycleManager {
    /// Create a lifecycle manager for one worker generation
    pub fn new(
        stores: StoreSet,
        manifest: Arc<ResourceManifest>,
        fetcher: Arc<dyn Fetcher>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            stores,
            manifest,
            fetcher,
            origin: origin.into(),
        }
    }

    /// Install phase: prime the temp store with the core shell.
    ///
    /// Every shell resource is fetched with forced revalidation and stored
    /// keyed by its request URL. If any fetch fails the temp store is
    /// deleted and the error propagates; the install attempt leaves no
    /// cache mutation behind and will be retried from scratch.
    pub async fn install(&self) -> WorkerResult<()> {
        let temp = self.stores.temp().await?;
        debug!(
            "priming {} core shell resources",
            self.manifest.core_shell().len()
        );
        if let Err(err) = self.prime_shell(&*temp).await {
            if let Err(cleanup) = self.stores.delete_temp().await {
                warn!("failed to discard staging store after install error: {cleanup}");
            }
            return Err(err);
        }
        info!("install complete, core shell staged");
        Ok(())
    }

    async fn prime_shell(&self, temp: &dyn Store) -> WorkerResult<()> {
        let fetches = self.manifest.core_shell().iter().map(|key| async move {
            let url = resource_url(&self.origin, key);
            let response = self
                .fetcher
                .fetch(&Request::get_reload(&url))
                .await
                .and_then(|response| {
                    if response.is_ok() {
                        Ok(response)
                    } else {
                        Err(WorkerError::fetch(&url, format!("HTTP {}", response.status)))
                    }
                })
                .map_err(|e| WorkerError::InstallFailed {
                    resource: key.clone(),
                    source: Box::new(e),
                })?;
            temp.put(&url, response.encode()?).await?;
            Ok::<(), WorkerError>(())
        });
        try_join_all(fetches).await?;
        Ok(())
    }

    /// Activate phase: migrate the content store to the current manifest.
    ///
    /// Runs the upgrade algorithm and, on any error, falls back to the
    /// total-reset recovery branch. Only a failure of the reset itself
    /// propagates; a successfully reset worker activates with an empty
    /// cache.
    pub async fn activate(&self) -> WorkerResult<()> {
        match self.upgrade().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("cache upgrade failed, resetting all stores: {err}");
                self.stores.reset_all().await?;
                Ok(())
            }
        }
    }

    async fn upgrade(&self) -> WorkerResult<()> {
        let meta = self.stores.meta().await?;
        let content = self.stores.content().await?;
        let temp = self.stores.temp().await?;

        let content = match meta.get(RECORD_KEY).await? {
            None => {
                // No prior record: cold start. Wipe the content store so no
                // garbage from an inconsistent profile survives.
                debug!("no prior manifest record, cold-starting content store");
                drop(content);
                self.stores.delete_content().await?;
                self.stores.content().await?
            }
            Some(bytes) => {
                let old = PersistedManifestRecord::decode(&bytes)?;
                let removed = self.evict_stale(&*content, &old).await?;
                debug!(
                    "upgrade from generation {}: {} stale entries evicted",
                    old.generation, removed
                );
                content
            }
        };

        // Stale eviction is complete; promote the staged shell. This
        // unconditionally overwrites any retained entry of the same key,
        // so a freshly revalidated shell file always wins.
        let promoted = self.promote(&*temp, &*content).await?;
        self.stores.delete_temp().await?;

        let record = PersistedManifestRecord::for_manifest(&self.manifest);
        meta.put(RECORD_KEY, record.encode()?).await?;
        info!(
            "activation complete: generation {}, {} shell entries promoted",
            record.generation, promoted
        );
        Ok(())
    }

    /// Delete every content entry whose resource is gone from the current
    /// manifest or whose fingerprint changed since the old one. Entries
    /// with an unchanged fingerprint are kept and never re-fetched.
    async fn evict_stale(
        &self,
        content: &dyn Store,
        old: &PersistedManifestRecord,
    ) -> WorkerResult<usize> {
        let mut removed = 0;
        for url in content.keys().await? {
            let keep = match origin_relative(&url, &self.origin) {
                Some(key) => {
                    let current = self.manifest.fingerprint(&key);
                    current.is_some() && current == old.fingerprint(&key)
                }
                // Not resolvable against our origin: orphaned, drop it
                None => false,
            };
            if !keep {
                content.delete(&url).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Copy every staged entry into the content store
    async fn promote(&self, temp: &dyn Store, content: &dyn Store) -> WorkerResult<usize> {
        let mut promoted = 0;
        for url in temp.keys().await? {
            if let Some(blob) = temp.get(&url).await? {
                content.put(&url, blob).await?;
                promoted += 1;
            }
        }
        Ok(promoted)
    }
}
