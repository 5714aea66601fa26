//! Out-of-band control channel
//!
//! Controlled clients send two string-tagged commands: `skipWaiting`
//! forces a waiting worker to activate immediately, and `downloadOffline`
//! prefetches every manifest resource not yet in the content store, so
//! the hosting page can guarantee full offline availability beyond the
//! core shell. Anything else is ignored.

use crate::error::{WorkerError, WorkerResult};
use crate::manifest::ResourceManifest;
use crate::net::{Fetcher, Request};
use crate::router::{origin_relative, resource_url};
use crate::store::StoreSet;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// A recognized control command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Move a waiting worker straight to activation
    SkipWaiting,
    /// Prefetch every manifest resource missing from the content store
    DownloadOffline,
}

impl ControlCommand {
    /// Parse a raw message payload; unrecognized payloads yield `None`
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "skipWaiting" => Some(Self::SkipWaiting),
            "downloadOffline" => Some(Self::DownloadOffline),
            _ => None,
        }
    }

    /// The wire string for this command
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkipWaiting => "skipWaiting",
            Self::DownloadOffline => "downloadOffline",
        }
    }
}

/// Fetch and store every manifest resource not currently cached.
///
/// Resources are fetched sequentially; the first failure aborts the
/// remaining batch with [`WorkerError::PrefetchAborted`]. Entries stored
/// before the failure stay cached. Returns how many resources were
/// fetched.
pub async fn download_offline(
    stores: &StoreSet,
    manifest: &ResourceManifest,
    fetcher: &dyn Fetcher,
    origin: &str,
) -> WorkerResult<usize> {
    let content = stores.content().await?;

    let cached: BTreeSet<String> = content
        .keys()
        .await?
        .iter()
        .filter_map(|url| origin_relative(url, origin))
        .collect();

    let mut fetched = 0;
    for key in manifest.paths() {
        if cached.contains(key) {
            continue;
        }
        let url = resource_url(origin, key);
        let response = fetcher
            .fetch(&Request::get(&url))
            .await
            .and_then(|response| {
                if response.is_ok() {
                    Ok(response)
                } else {
                    Err(WorkerError::fetch(&url, format!("HTTP {}", response.status)))
                }
            })
            .map_err(|e| WorkerError::PrefetchAborted {
                resource: key.to_string(),
                source: Box::new(e),
            })?;
        content.put(&url, response.encode()?).await?;
        fetched += 1;
        debug!("prefetched {}", key);
    }

    info!("offline prefetch complete: {} resources fetched", fetched);
    Ok(fetched)
}
