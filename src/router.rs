//! Fetch routing
//!
//! Classifies every intercepted request against the resource manifest and
//! applies one of three serving strategies:
//!
//! - not a manifest resource (or non-GET, or cross-origin): pass through
//!   to default network handling
//! - the root document `/`: online-first with cached fallback, so a fresh
//!   deployment is picked up immediately whenever the network is up
//! - any other manifest resource: cache-first with lazy population; the
//!   entry is fingerprinted and immutable under its key, so a cache hit
//!   is always safe to serve

use crate::error::WorkerResult;
use crate::manifest::{ResourceManifest, ROOT_KEY};
use crate::net::{Fetcher, Method, Request, Response};
use crate::store::StoreSet;
use std::sync::Arc;
use tracing::debug;

/// Resolve a same-origin URL to its manifest-relative key.
///
/// The bare origin, a fragment-only navigation, and the empty remainder
/// all map to the root key `/`. Cross-origin URLs resolve to `None`.
pub fn origin_relative(url: &str, origin: &str) -> Option<String> {
    let rest = url.strip_prefix(origin)?;
    if rest.is_empty() {
        return Some(ROOT_KEY.to_string());
    }
    let rest = rest.strip_prefix('/')?;
    if rest.is_empty() || rest.starts_with('#') {
        Some(ROOT_KEY.to_string())
    } else {
        Some(rest.to_string())
    }
}

/// Resolve a request URL to its manifest key, additionally stripping a
/// cache-busting `?<param>=...` suffix.
pub fn request_key(url: &str, origin: &str, bust_param: &str) -> Option<String> {
    let mut key = origin_relative(url, origin)?;
    let marker = format!("?{}=", bust_param);
    if let Some(idx) = key.find(&marker) {
        key.truncate(idx);
    }
    if key.is_empty() {
        key = ROOT_KEY.to_string();
    }
    Some(key)
}

/// Absolute URL a manifest key is fetched from and cached under
pub fn resource_url(origin: &str, key: &str) -> String {
    if key == ROOT_KEY {
        format!("{}/", origin)
    } else {
        format!("{}/{}", origin, key)
    }
}

/// Outcome of routing one intercepted request
#[derive(Debug)]
pub enum RouteOutcome {
    /// Not our concern; the host should fall through to normal handling
    PassThrough,
    /// Serve this response to the caller
    Response(Response),
}

/// Routes intercepted requests to cache, network, or pass-through
pub struct FetchRouter {
    stores: StoreSet,
    manifest: Arc<ResourceManifest>,
    fetcher: Arc<dyn Fetcher>,
    origin: String,
    cache_bust_param: String,
}

impl FetchRouter {
    /// Create a router over the content store
    pub fn new(
        stores: StoreSet,
        manifest: Arc<ResourceManifest>,
        fetcher: Arc<dyn Fetcher>,
        origin: impl Into<String>,
        cache_bust_param: impl Into<String>,
    ) -> Self {
        Self {
            stores,
            manifest,
            fetcher,
            origin: origin.into(),
            cache_bust_param: cache_bust_param.into(),
        }
    }

    /// Classify a request and serve it with the matching strategy
    pub async fn route(&self, request: &Request) -> WorkerResult<RouteOutcome> {
        if request.method != Method::Get {
            return Ok(RouteOutcome::PassThrough);
        }
        let Some(key) = request_key(&request.url, &self.origin, &self.cache_bust_param) else {
            return Ok(RouteOutcome::PassThrough);
        };
        if !self.manifest.contains(&key) {
            debug!("passing through unmanaged request: {}", request.url);
            return Ok(RouteOutcome::PassThrough);
        }
        let response = if key == ROOT_KEY {
            // The bare origin, `origin/`, and fragment navigations are all
            // the same root document; canonicalize before fetching and
            // caching so every surface form shares one entry.
            let canonical = Request {
                method: request.method.clone(),
                url: resource_url(&self.origin, ROOT_KEY),
                mode: request.mode,
            };
            self.online_first(&canonical).await?
        } else {
            self.cache_first(request).await?
        };
        Ok(RouteOutcome::Response(response))
    }

    /// Prefer the network; fall back to cache only when the fetch fails.
    ///
    /// A resolved response is cached regardless of status so the next
    /// offline navigation serves whatever the origin last returned.
    async fn online_first(&self, request: &Request) -> WorkerResult<Response> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                let content = self.stores.content().await?;
                content.put(&request.url, response.encode()?).await?;
                Ok(response)
            }
            Err(err) => {
                let content = self.stores.content().await?;
                match content.get(&request.url).await? {
                    Some(blob) => {
                        debug!("network unavailable, serving cached root document");
                        Response::decode(&request.url, &blob)
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Serve from cache; on a miss, fetch and cache only a 2xx response.
    async fn cache_first(&self, request: &Request) -> WorkerResult<Response> {
        let content = self.stores.content().await?;
        if let Some(blob) = content.get(&request.url).await? {
            return Response::decode(&request.url, &blob);
        }
        let response = self.fetcher.fetch(request).await?;
        if response.is_ok() {
            content.put(&request.url, response.encode()?).await?;
        }
        Ok(response)
    }
}
