//! Shared test doubles for the worker suites.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::StatusCode;
use shellkit_common::ManualClock;
use shellkit_net::{NetError, Network, Request, Response};
use shellkit_sw::{
    CacheEntry, CacheError, CacheStore, ClientRegistry, MemoryCacheStorage, ShellWorker,
    WorkerConfig, WorkerDeps,
};
use tokio::sync::watch;
use url::Url;

pub const SCOPE: &str = "https://attendance.example.org/app/";

pub fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

enum Route {
    Respond(Response),
    Fail,
}

/// Scripted network. Unknown URLs fail like an unreachable host.
pub struct MockNetwork {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
    gate: watch::Sender<bool>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gate,
        })
    }

    pub fn respond(&self, url: &Url, body: &str) {
        self.respond_with(url, Response::new(StatusCode::OK, body.to_string()));
    }

    pub fn respond_with(&self, url: &Url, response: Response) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Respond(response));
    }

    pub fn fail(&self, url: &Url) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Fail);
    }

    /// Block every fetch until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls_to(&self, url: &Url) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == url.as_str())
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        self.calls.lock().unwrap().push(request.url.to_string());

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let routes = self.routes.lock().unwrap();
        match routes.get(request.url.as_str()) {
            Some(Route::Respond(response)) => Ok(response.clone().with_url(request.url.clone())),
            Some(Route::Fail) | None => Err(NetError::RequestFailed(format!(
                "unreachable: {}",
                request.url
            ))),
        }
    }
}

/// Memory storage whose `open`, `keys` or `delete` can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryCacheStorage,
    pub fail_open: bool,
    pub fail_keys: bool,
    pub fail_delete: HashSet<String>,
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        if self.fail_open {
            return Err(CacheError::Unavailable("quota exceeded".into()));
        }
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if self.fail_delete.contains(name) {
            return Err(CacheError::Unavailable(format!("{name} is locked")));
        }
        self.inner.delete(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        if self.fail_keys {
            return Err(CacheError::Unavailable("storage offline".into()));
        }
        self.inner.keys().await
    }

    async fn match_request(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<CacheEntry>, CacheError> {
        self.inner.match_request(name, request).await
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.inner.put(name, entry).await
    }

    async fn put_if_present(&self, name: &str, entry: CacheEntry) -> Result<bool, CacheError> {
        self.inner.put_if_present(name, entry).await
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError> {
        self.inner.entries(name).await
    }
}

/// Injected collaborators for one test.
pub struct Harness {
    pub store: Arc<dyn CacheStore>,
    pub network: Arc<MockNetwork>,
    pub clock: Arc<ManualClock>,
    pub clients: Arc<ClientRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryCacheStorage::new()))
    }

    pub fn with_store(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            network: MockNetwork::new(),
            clock: Arc::new(ManualClock::new(1_000)),
            clients: Arc::new(ClientRegistry::new()),
        }
    }

    pub fn deps(&self) -> WorkerDeps {
        WorkerDeps {
            store: self.store.clone(),
            network: self.network.clone(),
            clock: self.clock.clone(),
            clients: self.clients.clone(),
        }
    }

    /// Config for `version` with a two-asset shell, both reachable.
    pub fn config(&self, version: &str) -> WorkerConfig {
        WorkerConfig {
            scope: SCOPE.to_string(),
            version: version.to_string(),
            shell: vec!["./".to_string(), "./index.html".to_string()],
            ..Default::default()
        }
    }

    /// Make the shell of [`config`](Self::config) reachable.
    pub fn serve_shell(&self) {
        self.network.respond(&url("./"), "<html>root</html>");
        self.network.respond(&url("./index.html"), "<html>shell</html>");
    }

    pub fn worker(&self, config: WorkerConfig) -> ShellWorker {
        ShellWorker::new(config, self.deps()).unwrap()
    }

    /// Sorted URLs stored in a cache.
    pub async fn cached_urls(&self, cache: &str) -> Vec<String> {
        let mut urls: Vec<String> = self
            .store
            .entries(cache)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.url.to_string())
            .collect();
        urls.sort();
        urls
    }

    pub async fn cached_body(&self, cache: &str, target: &Url) -> Option<String> {
        self.store
            .match_request(cache, &Request::get(target.clone()))
            .await
            .unwrap()
            .map(|e| e.response.text().unwrap())
    }
}
