//! Integration tests for shellcache
//!
//! Drives a full worker over the in-memory storage backend with scripted
//! and fault-injecting doubles for the host capabilities.

mod common {
    use async_trait::async_trait;
    use shellcache::config::StoreNames;
    use shellcache::net::{Fetcher, Request, Response};
    use shellcache::store::{
        CacheStorage, MemoryStorage, Store, StoreError, StoreHandle, StoreResult,
    };
    use shellcache::{CacheWorker, ResourceManifest, WorkerConfig, WorkerError, WorkerResult};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    pub const ORIGIN: &str = "https://app.example.com";

    pub fn init_logs() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Scripted fetcher: URL -> (status, body), with an offline switch
    /// and a call log.
    pub struct ScriptedFetcher {
        responses: Mutex<BTreeMap<String, (u16, Vec<u8>)>>,
        offline: AtomicBool,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(BTreeMap::new()),
                offline: AtomicBool::new(false),
                log: Mutex::new(Vec::new()),
            }
        }

        pub fn serve(&self, url: &str, status: u16, body: &[u8]) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), (status, body.to_vec()));
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub fn fetch_count(&self, url: &str) -> usize {
            self.log.lock().unwrap().iter().filter(|u| *u == url).count()
        }

        pub fn total_fetches(&self) -> usize {
            self.log.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &Request) -> WorkerResult<Response> {
            self.log.lock().unwrap().push(request.url.clone());
            if self.offline.load(Ordering::SeqCst) {
                return Err(WorkerError::fetch(&request.url, "network unreachable"));
            }
            match self.responses.lock().unwrap().get(&request.url) {
                Some((status, body)) => Ok(Response {
                    status: *status,
                    headers: Vec::new(),
                    body: body.clone(),
                }),
                None => Err(WorkerError::fetch(&request.url, "no route to host")),
            }
        }
    }

    /// Storage wrapper that fails per-key operations once a countdown
    /// expires. Whole-store deletion always succeeds, so the activation
    /// reset branch can still run.
    #[derive(Clone)]
    pub struct FlakyStorage {
        inner: MemoryStorage,
        remaining: Arc<AtomicUsize>,
        armed: Arc<AtomicBool>,
    }

    impl FlakyStorage {
        pub fn new(inner: MemoryStorage, fail_after: usize) -> Self {
            Self {
                inner,
                remaining: Arc::new(AtomicUsize::new(fail_after)),
                armed: Arc::new(AtomicBool::new(true)),
            }
        }

        pub fn disarm(&self) {
            self.armed.store(false, Ordering::SeqCst);
        }

        fn tick(&self) -> StoreResult<()> {
            if !self.armed.load(Ordering::SeqCst) {
                return Ok(());
            }
            let before =
                self.remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            match before {
                Ok(_) => Ok(()),
                Err(_) => Err(StoreError::io(
                    "injected storage fault",
                    std::io::Error::other("disk gone"),
                )),
            }
        }
    }

    #[async_trait]
    impl CacheStorage for FlakyStorage {
        async fn open(&self, name: &str) -> StoreResult<StoreHandle> {
            let inner = self.inner.open(name).await?;
            Ok(Box::new(FlakyStore {
                inner,
                faults: self.clone(),
            }))
        }

        async fn delete(&self, name: &str) -> StoreResult<()> {
            self.inner.delete(name).await
        }

        async fn exists(&self, name: &str) -> StoreResult<bool> {
            self.inner.exists(name).await
        }
    }

    struct FlakyStore {
        inner: StoreHandle,
        faults: FlakyStorage,
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
            self.faults.tick()?;
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, blob: Vec<u8>) -> StoreResult<()> {
            self.faults.tick()?;
            self.inner.put(key, blob).await
        }

        async fn delete(&self, key: &str) -> StoreResult<bool> {
            self.faults.tick()?;
            self.inner.delete(key).await
        }

        async fn keys(&self) -> StoreResult<Vec<String>> {
            self.faults.tick()?;
            self.inner.keys().await
        }
    }

    pub fn manifest(entries: &[(&str, &str)], core: &[&str]) -> ResourceManifest {
        let resources = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ResourceManifest::new(resources, core.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    pub fn worker(
        manifest: ResourceManifest,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<ScriptedFetcher>,
    ) -> CacheWorker {
        CacheWorker::new(
            WorkerConfig::new(ORIGIN).unwrap(),
            manifest,
            storage,
            fetcher,
        )
    }

    pub fn url(key: &str) -> String {
        if key == "/" {
            format!("{}/", ORIGIN)
        } else {
            format!("{}/{}", ORIGIN, key)
        }
    }

    pub fn store_names() -> StoreNames {
        StoreNames::default()
    }
}

mod lifecycle_flow {
    use crate::common::*;
    use shellcache::store::{CacheStorage, MemoryStorage, StoreSet};
    use shellcache::WorkerState;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_install_reaches_active_with_shell_cached() {
        init_logs();
        let storage = MemoryStorage::new();
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(&url("index.html"), 200, b"<html>");
        fetcher.serve(&url("main.js"), 200, b"app");

        let manifest = manifest(
            &[
                ("/", "h-root"),
                ("index.html", "h-root"),
                ("main.js", "h-main"),
                ("assets/font.ttf", "h-font"),
            ],
            &["main.js", "index.html"],
        );
        let mut worker = worker(manifest, Arc::new(storage.clone()), fetcher.clone());

        worker.on_install().await.unwrap();
        worker.on_activate().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Active);

        let stores = StoreSet::new(Arc::new(storage.clone()), store_names());
        let content = stores.content().await.unwrap();
        let mut keys = content.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![url("index.html"), url("main.js")]);

        // TEMP is drained and gone
        assert!(!storage.exists("temp-cache").await.unwrap());
        // Shell was fetched exactly once each
        assert_eq!(fetcher.fetch_count(&url("main.js")), 1);
        assert_eq!(fetcher.fetch_count(&url("index.html")), 1);
    }

    #[tokio::test]
    async fn failed_install_retries_from_scratch() {
        init_logs();
        let storage = MemoryStorage::new();
        let fetcher = Arc::new(ScriptedFetcher::new());
        // index.html 404s on the first attempt
        fetcher.serve(&url("main.js"), 200, b"app");
        fetcher.serve(&url("index.html"), 404, b"");

        let manifest = manifest(
            &[("index.html", "h1"), ("main.js", "h2")],
            &["main.js", "index.html"],
        );
        let mut worker = worker(manifest, Arc::new(storage.clone()), fetcher.clone());

        assert!(worker.on_install().await.is_err());
        assert_eq!(worker.state(), WorkerState::New);
        assert!(!storage.exists("temp-cache").await.unwrap());

        // Deployment fixed; the retry succeeds
        fetcher.serve(&url("index.html"), 200, b"<html>");
        worker.on_install().await.unwrap();
        worker.on_activate().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Active);
    }

    #[tokio::test]
    async fn upgrade_diff_matches_expected_key_set() {
        init_logs();
        let storage = MemoryStorage::new();

        // v1: {a: h1, b: h2}, both in the shell so both get cached
        let fetcher_v1 = Arc::new(ScriptedFetcher::new());
        fetcher_v1.serve(&url("a"), 200, b"body-a");
        fetcher_v1.serve(&url("b"), 200, b"body-b");
        let v1 = manifest(&[("a", "h1"), ("b", "h2")], &["a", "b"]);
        let mut w1 = worker(v1, Arc::new(storage.clone()), fetcher_v1);
        w1.on_install().await.unwrap();
        w1.on_activate().await.unwrap();

        // v2: a unchanged, b's fingerprint changed, c new in the shell
        let fetcher_v2 = Arc::new(ScriptedFetcher::new());
        fetcher_v2.serve(&url("c"), 200, b"body-c");
        let v2 = manifest(&[("a", "h1"), ("b", "h3"), ("c", "h4")], &["c"]);
        let mut w2 = worker(v2, Arc::new(storage.clone()), fetcher_v2.clone());
        w2.on_install().await.unwrap();
        w2.on_activate().await.unwrap();

        let stores = StoreSet::new(Arc::new(storage), store_names());
        let content = stores.content().await.unwrap();
        let mut keys = content.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![url("a"), url("c")]);

        // a was reused: only c went over the network for v2
        assert_eq!(fetcher_v2.total_fetches(), 1);
        assert_eq!(fetcher_v2.fetch_count(&url("c")), 1);
    }
}

mod routing {
    use crate::common::*;
    use shellcache::net::{CacheMode, Method, Request};
    use shellcache::router::RouteOutcome;
    use shellcache::store::MemoryStorage;
    use std::sync::Arc;

    async fn active_worker(fetcher: Arc<ScriptedFetcher>) -> shellcache::CacheWorker {
        fetcher.serve(&url("index.html"), 200, b"<html>");
        let manifest = manifest(
            &[
                ("/", "h-root"),
                ("index.html", "h-root"),
                ("app.js", "h-app"),
                ("assets/logo.png", "h-logo"),
            ],
            &["index.html"],
        );
        let mut worker = worker(manifest, Arc::new(MemoryStorage::new()), fetcher);
        worker.on_install().await.unwrap();
        worker.on_activate().await.unwrap();
        worker
    }

    #[tokio::test]
    async fn non_get_passes_through() {
        init_logs();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let worker = active_worker(fetcher.clone()).await;

        let request = Request {
            method: Method::Post,
            url: url("app.js"),
            mode: CacheMode::Default,
        };
        let shell_fetches = fetcher.total_fetches();
        assert!(matches!(
            worker.on_fetch(&request).await.unwrap(),
            RouteOutcome::PassThrough
        ));
        assert_eq!(fetcher.total_fetches(), shell_fetches);
    }

    #[tokio::test]
    async fn unmanaged_requests_pass_through() {
        init_logs();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let worker = active_worker(fetcher.clone()).await;

        for unmanaged in [
            url("api/session"),
            "https://cdn.example.com/app.js".to_string(),
        ] {
            assert!(matches!(
                worker.on_fetch(&Request::get(unmanaged)).await.unwrap(),
                RouteOutcome::PassThrough
            ));
        }
    }

    #[tokio::test]
    async fn cache_first_populates_exactly_once() {
        init_logs();
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(&url("app.js"), 200, b"const x = 1;");
        let worker = active_worker(fetcher.clone()).await;

        let first = worker.on_fetch(&Request::get(url("app.js"))).await.unwrap();
        let RouteOutcome::Response(response) = first else {
            panic!("expected a routed response");
        };
        assert_eq!(response.body, b"const x = 1;");
        assert_eq!(fetcher.fetch_count(&url("app.js")), 1);

        // Second request is a pure cache hit, even offline
        fetcher.set_offline(true);
        let second = worker.on_fetch(&Request::get(url("app.js"))).await.unwrap();
        let RouteOutcome::Response(response) = second else {
            panic!("expected a routed response");
        };
        assert_eq!(response.body, b"const x = 1;");
        assert_eq!(fetcher.fetch_count(&url("app.js")), 1);
    }

    #[tokio::test]
    async fn cache_bust_parameter_resolves_to_manifest_key() {
        init_logs();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let busted = format!("{}?v=12345", url("app.js"));
        fetcher.serve(&url("app.js"), 200, b"app");
        fetcher.serve(&busted, 200, b"app");
        let worker = active_worker(fetcher.clone()).await;

        // The busted URL maps onto the manifest entry for app.js and is
        // therefore intercepted rather than passed through.
        let outcome = worker.on_fetch(&Request::get(&busted)).await.unwrap();
        assert!(matches!(outcome, RouteOutcome::Response(_)));
    }

    #[tokio::test]
    async fn non_ok_responses_are_served_but_never_cached() {
        init_logs();
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(&url("assets/logo.png"), 503, b"");
        let worker = active_worker(fetcher.clone()).await;

        let target = url("assets/logo.png");
        for _ in 0..2 {
            let outcome = worker.on_fetch(&Request::get(&target)).await.unwrap();
            let RouteOutcome::Response(response) = outcome else {
                panic!("expected a routed response");
            };
            assert_eq!(response.status, 503);
        }
        // No cache write happened: both requests hit the network
        assert_eq!(fetcher.fetch_count(&target), 2);
    }

    #[tokio::test]
    async fn cache_first_miss_propagates_network_failure() {
        init_logs();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let worker = active_worker(fetcher.clone()).await;

        fetcher.set_offline(true);
        let err = worker
            .on_fetch(&Request::get(url("assets/logo.png")))
            .await
            .unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn root_document_is_online_first_with_cached_fallback() {
        init_logs();
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(&url("/"), 200, b"<html>v2</html>");
        let worker = active_worker(fetcher.clone()).await;

        // Online: served from the network and cached under the request URL
        let outcome = worker.on_fetch(&Request::get(url("/"))).await.unwrap();
        let RouteOutcome::Response(response) = outcome else {
            panic!("expected a routed response");
        };
        assert_eq!(response.body, b"<html>v2</html>");
        assert_eq!(fetcher.fetch_count(&url("/")), 1);

        // Offline: the cached copy is the fallback
        fetcher.set_offline(true);
        let outcome = worker.on_fetch(&Request::get(url("/"))).await.unwrap();
        let RouteOutcome::Response(response) = outcome else {
            panic!("expected a routed response");
        };
        assert_eq!(response.body, b"<html>v2</html>");
        // The network was still tried first
        assert_eq!(fetcher.fetch_count(&url("/")), 2);
    }

    #[tokio::test]
    async fn root_document_without_cache_propagates_failure() {
        init_logs();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let worker = active_worker(fetcher.clone()).await;

        fetcher.set_offline(true);
        let err = worker.on_fetch(&Request::get(url("/"))).await.unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn bare_origin_and_fragment_route_as_root() {
        init_logs();
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(&url("/"), 200, b"root");
        let worker = active_worker(fetcher.clone()).await;

        for variant in [ORIGIN.to_string(), format!("{}/#settings", ORIGIN)] {
            let outcome = worker.on_fetch(&Request::get(&variant)).await.unwrap();
            assert!(matches!(outcome, RouteOutcome::Response(_)));
        }
        // Every surface form goes over the wire as the canonical root URL
        assert_eq!(fetcher.fetch_count(&url("/")), 2);
        assert_eq!(fetcher.fetch_count(ORIGIN), 0);
    }

    #[tokio::test]
    async fn root_cache_shared_across_surface_forms() {
        init_logs();
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(&url("/"), 200, b"<html>root</html>");
        let worker = active_worker(fetcher.clone()).await;

        // Cache the root via an online fragment navigation
        let outcome = worker
            .on_fetch(&Request::get(format!("{}/#settings", ORIGIN)))
            .await
            .unwrap();
        assert!(matches!(outcome, RouteOutcome::Response(_)));

        // Offline, every equivalent form falls back to that one entry
        fetcher.set_offline(true);
        for variant in [
            ORIGIN.to_string(),
            url("/"),
            format!("{}/#about", ORIGIN),
        ] {
            let outcome = worker.on_fetch(&Request::get(&variant)).await.unwrap();
            let RouteOutcome::Response(response) = outcome else {
                panic!("expected cached root for {}", variant);
            };
            assert_eq!(response.body, b"<html>root</html>");
        }
    }
}

mod control_channel {
    use crate::common::*;
    use shellcache::net::Request;
    use shellcache::router::RouteOutcome;
    use shellcache::store::{MemoryStorage, StoreSet};
    use shellcache::WorkerError;
    use std::sync::Arc;

    #[tokio::test]
    async fn download_offline_fills_the_gaps() {
        init_logs();
        let storage = MemoryStorage::new();
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(&url("index.html"), 200, b"<html>");
        fetcher.serve(&url("/"), 200, b"<html>");
        fetcher.serve(&url("big.wasm"), 200, b"wasm-bytes");
        fetcher.serve(&url("font.ttf"), 200, b"font-bytes");

        let manifest = manifest(
            &[
                ("/", "h-root"),
                ("index.html", "h-root"),
                ("big.wasm", "h-wasm"),
                ("font.ttf", "h-font"),
            ],
            &["index.html"],
        );
        let mut worker = worker(manifest, Arc::new(storage.clone()), fetcher.clone());
        worker.on_install().await.unwrap();
        worker.on_activate().await.unwrap();

        worker.on_message("downloadOffline").await.unwrap();

        let stores = StoreSet::new(Arc::new(storage), store_names());
        let content = stores.content().await.unwrap();
        assert_eq!(content.keys().await.unwrap().len(), 4);

        // index.html was already cached by install; not fetched again
        assert_eq!(fetcher.fetch_count(&url("index.html")), 1);

        // Everything now serves offline
        fetcher.set_offline(true);
        for key in ["big.wasm", "font.ttf"] {
            let outcome = worker.on_fetch(&Request::get(url(key))).await.unwrap();
            assert!(matches!(outcome, RouteOutcome::Response(_)));
        }
    }

    #[tokio::test]
    async fn prefetch_failure_aborts_remaining_batch() {
        init_logs();
        let storage = MemoryStorage::new();
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(&url("index.html"), 200, b"<html>");
        // "a" resolves, "b" is missing, "c" would resolve but comes later
        fetcher.serve(&url("a"), 200, b"body-a");
        fetcher.serve(&url("c"), 200, b"body-c");

        let manifest = manifest(
            &[("index.html", "h0"), ("a", "h1"), ("b", "h2"), ("c", "h3")],
            &["index.html"],
        );
        let mut worker = worker(manifest, Arc::new(storage.clone()), fetcher.clone());
        worker.on_install().await.unwrap();
        worker.on_activate().await.unwrap();

        let err = worker.on_message("downloadOffline").await.unwrap_err();
        assert!(matches!(err, WorkerError::PrefetchAborted { .. }));

        // Manifest paths iterate in order: a was stored, c never fetched
        let stores = StoreSet::new(Arc::new(storage), store_names());
        let content = stores.content().await.unwrap();
        let keys = content.keys().await.unwrap();
        assert!(keys.contains(&url("a")));
        assert!(!keys.contains(&url("c")));
        assert_eq!(fetcher.fetch_count(&url("c")), 0);
    }
}

mod fault_injection {
    use crate::common::*;
    use shellcache::config::StoreNames;
    use shellcache::lifecycle::LifecycleManager;
    use shellcache::store::{CacheStorage, MemoryStorage, StoreSet};
    use std::sync::Arc;

    /// Injecting a storage fault at every successive point inside the
    /// activation algorithm must always end in either a completed upgrade
    /// or the total-reset branch. A partially migrated content store is
    /// never left behind.
    #[tokio::test]
    async fn activation_fault_at_any_point_never_leaves_partial_state() {
        init_logs();
        for fail_after in 0..16 {
            let inner = MemoryStorage::new();

            // Seed a prior generation so the upgrade diff branch runs
            let fetcher_v1 = Arc::new(ScriptedFetcher::new());
            fetcher_v1.serve(&url("a"), 200, b"body-a");
            fetcher_v1.serve(&url("b"), 200, b"body-b");
            let v1 = manifest(&[("a", "h1"), ("b", "h2")], &["a", "b"]);
            let mut w1 = worker(v1, Arc::new(inner.clone()), fetcher_v1);
            w1.on_install().await.unwrap();
            w1.on_activate().await.unwrap();

            // Stage the v2 shell on healthy storage
            let fetcher_v2 = Arc::new(ScriptedFetcher::new());
            fetcher_v2.serve(&url("c"), 200, b"body-c");
            let v2 = manifest(&[("a", "h1"), ("b", "h3"), ("c", "h4")], &["c"]);
            let staging = LifecycleManager::new(
                StoreSet::new(Arc::new(inner.clone()), StoreNames::default()),
                Arc::new(v2),
                fetcher_v2,
                ORIGIN,
            );
            staging.install().await.unwrap();

            // Activate over storage that fails after `fail_after` per-key ops
            let flaky = FlakyStorage::new(inner.clone(), fail_after);
            let fetcher_idle = Arc::new(ScriptedFetcher::new());
            let v2 = manifest(&[("a", "h1"), ("b", "h3"), ("c", "h4")], &["c"]);
            let activation = LifecycleManager::new(
                StoreSet::new(Arc::new(flaky.clone()), StoreNames::default()),
                Arc::new(v2),
                fetcher_idle,
                ORIGIN,
            );
            activation.activate().await.unwrap();
            flaky.disarm();

            let temp_exists = inner.exists("temp-cache").await.unwrap();
            let meta_exists = inner.exists("manifest-meta").await.unwrap();
            let content_exists = inner.exists("content-cache").await.unwrap();
            let keys = if content_exists {
                let stores = StoreSet::new(
                    Arc::new(inner.clone()) as Arc<dyn CacheStorage>,
                    StoreNames::default(),
                );
                stores.content().await.unwrap().keys().await.unwrap()
            } else {
                Vec::new()
            };

            let complete = keys == vec![url("a"), url("c")] && !temp_exists && meta_exists;
            let reset = keys.is_empty() && !temp_exists && !meta_exists;
            assert!(
                complete || reset,
                "fail_after={}: partially migrated state, content keys {:?}",
                fail_after,
                keys
            );
        }
    }
}
