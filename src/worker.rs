//! Worker facade and lifecycle state machine
//!
//! [`CacheWorker`] ties the lifecycle manager, fetch router, and control
//! channel together behind the four events a host runtime delivers:
//! install, activate, fetch, message. Each entry point drives its async
//! work to completion before returning, which is how the host's
//! pending-work lifetime is extended (the waitUntil contract).

use crate::config::WorkerConfig;
use crate::control::{download_offline, ControlCommand};
use crate::error::{WorkerError, WorkerResult};
use crate::lifecycle::LifecycleManager;
use crate::manifest::ResourceManifest;
use crate::net::{Fetcher, Request};
use crate::router::{FetchRouter, RouteOutcome};
use crate::store::{CacheStorage, StoreSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Lifecycle state of one worker instance.
///
/// Exactly one activation runs per instance: `Waiting -> Activating ->
/// Active` is a one-way trip, and fetch routing is only available once
/// the instance is `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Registered, not yet installed
    New,
    /// Install phase in progress
    Installing,
    /// Installed, waiting to take over
    Waiting,
    /// Activation phase in progress
    Activating,
    /// Controlling clients, routing fetches
    Active,
}

impl WorkerState {
    /// State name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Installing => "installing",
            Self::Waiting => "waiting",
            Self::Activating => "activating",
            Self::Active => "active",
        }
    }
}

/// One worker generation: manifest, stores, lifecycle, and routing
pub struct CacheWorker {
    config: WorkerConfig,
    stores: StoreSet,
    lifecycle: LifecycleManager,
    router: FetchRouter,
    manifest: Arc<ResourceManifest>,
    fetcher: Arc<dyn Fetcher>,
    state: WorkerState,
    skip_waiting: bool,
}

impl CacheWorker {
    /// Assemble a worker from its injected capabilities
    pub fn new(
        config: WorkerConfig,
        manifest: ResourceManifest,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let manifest = Arc::new(manifest);
        let stores = StoreSet::new(storage, config.stores.clone());
        let lifecycle = LifecycleManager::new(
            stores.clone(),
            manifest.clone(),
            fetcher.clone(),
            config.origin.clone(),
        );
        let router = FetchRouter::new(
            stores.clone(),
            manifest.clone(),
            fetcher.clone(),
            config.origin.clone(),
            config.cache_bust_param.clone(),
        );
        Self {
            config,
            stores,
            lifecycle,
            router,
            manifest,
            fetcher,
            state: WorkerState::New,
            skip_waiting: false,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Whether this worker asked the host to skip the waiting phase
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    /// The manifest this worker generation serves
    pub fn manifest(&self) -> &ResourceManifest {
        &self.manifest
    }

    fn expect_state(&self, expected: WorkerState) -> WorkerResult<()> {
        if self.state != expected {
            return Err(WorkerError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        Ok(())
    }

    /// Install event: prime the core shell into the staging store.
    ///
    /// Also eagerly requests skip-waiting, so a host that honors the
    /// signal can activate this worker without waiting for existing
    /// clients to close. On failure the worker stays uninstalled and the
    /// whole attempt is retried from scratch on the next registration.
    pub async fn on_install(&mut self) -> WorkerResult<()> {
        self.expect_state(WorkerState::New)?;
        self.state = WorkerState::Installing;
        self.skip_waiting = true;

        match self.lifecycle.install().await {
            Ok(()) => {
                self.state = WorkerState::Waiting;
                info!("worker installed, now waiting");
                Ok(())
            }
            Err(err) => {
                self.state = WorkerState::New;
                Err(err)
            }
        }
    }

    /// Activate event: migrate the content store to this manifest.
    ///
    /// Never fails on cache inconsistency; the reset branch inside the
    /// lifecycle manager guarantees the worker always reaches `Active`,
    /// possibly with an empty cache.
    pub async fn on_activate(&mut self) -> WorkerResult<()> {
        self.expect_state(WorkerState::Waiting)?;
        self.state = WorkerState::Activating;

        match self.lifecycle.activate().await {
            Ok(()) => {
                self.state = WorkerState::Active;
                info!("worker active");
                Ok(())
            }
            Err(err) => {
                // Even the reset failed; storage itself is broken.
                self.state = WorkerState::Waiting;
                Err(err)
            }
        }
    }

    /// Fetch event: route an intercepted request.
    ///
    /// The host contract dispatches fetches only to an active worker;
    /// anything earlier is a state error, never a stale response.
    pub async fn on_fetch(&self, request: &Request) -> WorkerResult<RouteOutcome> {
        self.expect_state(WorkerState::Active)?;
        self.router.route(request).await
    }

    /// Message event: handle a control command, ignoring anything else
    pub async fn on_message(&mut self, raw: &str) -> WorkerResult<()> {
        match ControlCommand::parse(raw) {
            Some(ControlCommand::SkipWaiting) => {
                self.skip_waiting = true;
                if self.state == WorkerState::Waiting {
                    debug!("skipWaiting received, activating immediately");
                    self.on_activate().await?;
                }
                Ok(())
            }
            Some(ControlCommand::DownloadOffline) => {
                let fetched = download_offline(
                    &self.stores,
                    &self.manifest,
                    &*self.fetcher,
                    &self.config.origin,
                )
                .await?;
                debug!("downloadOffline fetched {} resources", fetched);
                Ok(())
            }
            None => {
                debug!("ignoring unrecognized control message: {:?}", raw);
                Ok(())
            }
        }
    }
}
