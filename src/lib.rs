//! shellcache - Offline application-shell cache worker
//!
//! Keeps a versioned bundle of static resources available offline,
//! upgrades it atomically when a new manifest ships, and routes each
//! intercepted request to cache, network, or a network-first hybrid.
//!
//! The host runtime supplies two capabilities: named key/blob stores
//! ([`store::CacheStorage`]) and network fetch ([`net::Fetcher`]).
//! Everything else, from install-time shell priming through the
//! activate-time manifest diff, fetch routing, and the control channel,
//! lives here and runs against any implementation of those traits.

pub mod config;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod net;
pub mod router;
pub mod store;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use manifest::ResourceManifest;
pub use worker::{CacheWorker, WorkerState};
