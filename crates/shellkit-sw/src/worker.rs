//! The interception cache manager.
//!
//! [`ShellWorker`] is the long-lived service object behind one worker
//! version. Each platform event has an explicit entry point; everything the
//! worker touches (cache storage, network, clock, open pages) is injected
//! through [`WorkerDeps`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use shellkit_common::Clock;
use shellkit_net::{ExclusionSet, NetError, Network, Request, Response};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStore};
use crate::clients::{ClientMatchOptions, ClientRegistry, ClientType};
use crate::config::{ActivationPolicy, CleanupScope, WorkerConfig};
use crate::error::{CacheError, ServiceWorkerError};
use crate::messages::{ControlMessage, Notification, PushPayload, WorkerMessage};
use crate::policy::{self, ResponseClass};
use crate::registration::ServiceWorkerId;
use crate::wait_until::WaitUntil;

/// Collaborators provided by the host.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn CacheStore>,
    pub network: Arc<dyn Network>,
    pub clock: Arc<dyn Clock>,
    pub clients: Arc<ClientRegistry>,
}

/// Where the response handed to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Stored copy, possibly stale.
    Cache,
    /// Live network response.
    Network,
    /// Cached navigation fallback document.
    Fallback,
    /// Synthetic 503.
    Offline,
}

/// What the host should do with an intercepted request.
#[derive(Debug)]
pub enum FetchDecision {
    /// Not intercepted; the host performs the request natively.
    Passthrough,
    /// Answer the page with this response.
    Respond {
        response: Response,
        source: ResponseSource,
    },
}

/// Result of [`ShellWorker::on_fetch`].
#[derive(Debug)]
pub struct FetchOutcome {
    pub decision: FetchDecision,
    /// Background work (cache refresh) the host must keep alive.
    pub wait_until: WaitUntil,
}

impl FetchOutcome {
    pub fn passthrough() -> Self {
        Self {
            decision: FetchDecision::Passthrough,
            wait_until: WaitUntil::new(),
        }
    }

    fn respond(response: Response, source: ResponseSource, wait_until: WaitUntil) -> Self {
        Self {
            decision: FetchDecision::Respond { response, source },
            wait_until,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.decision, FetchDecision::Passthrough)
    }

    pub fn response(&self) -> Option<&Response> {
        match &self.decision {
            FetchDecision::Respond { response, .. } => Some(response),
            FetchDecision::Passthrough => None,
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match &self.decision {
            FetchDecision::Respond { source, .. } => Some(*source),
            FetchDecision::Passthrough => None,
        }
    }
}

/// Outcome of shell population at install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub cache_name: String,
    pub cached: Vec<Url>,
    /// URLs that could not be cached, with the reason.
    pub failed: Vec<(Url, String)>,
}

/// A stale cache that could not be removed. `cache` is `None` when listing failed.
#[derive(Debug, Clone)]
pub struct CleanupFailure {
    pub cache: Option<String>,
    pub error: CacheError,
}

/// Outcome of activation.
#[derive(Debug, Clone)]
pub struct ActivateReport {
    pub cache_name: String,
    pub deleted: Vec<String>,
    pub cleanup_errors: Vec<CleanupFailure>,
    /// Clients whose controller changed to this worker.
    pub claimed: Vec<String>,
}

/// Handle on the current cache, cheap to clone into spawned tasks.
#[derive(Clone)]
struct ShellCache {
    name: String,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    clock: Arc<dyn Clock>,
}

impl ShellCache {
    async fn lookup(&self, request: &Request) -> Option<CacheEntry> {
        match self.store.match_request(&self.name, request).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(cache = %self.name, url = %request.url, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    /// Persist the response if policy allows. Returns its class and whether
    /// it was written.
    ///
    /// Writes only land in a cache that still exists: once a newer version
    /// has deleted this one, late refreshes are dropped.
    async fn store_if_cacheable(
        &self,
        request: &Request,
        result: &Result<Response, NetError>,
    ) -> Result<(ResponseClass, bool), CacheError> {
        let class = policy::classify(result);
        let stored = match result {
            Ok(response) if policy::should_cache(class) => {
                let entry = CacheEntry::capture(request, response.clone(), self.clock.now_millis());
                let stored = self.store.put_if_present(&self.name, entry).await?;
                if stored {
                    trace!(cache = %self.name, url = %request.url, "Stored response");
                } else {
                    debug!(cache = %self.name, url = %request.url, "Cache deleted, response dropped");
                }
                stored
            }
            _ => {
                trace!(url = %request.url, ?class, "Response not cacheable");
                false
            }
        };
        Ok((class, stored))
    }

    async fn fetch_and_store(&self, request: Request) -> Result<Response, NetError> {
        let result = self.network.fetch(request.clone()).await;
        if let Err(e) = self.store_if_cacheable(&request, &result).await {
            warn!(cache = %self.name, url = %request.url, error = %e, "Cache write failed");
        }
        result
    }

    async fn add(&self, url: Url) -> Result<(), String> {
        let request = Request::get(url);
        let result = self.network.fetch(request.clone()).await;
        let (class, stored) = self
            .store_if_cacheable(&request, &result)
            .await
            .map_err(|e| e.to_string())?;
        match result {
            Err(e) => Err(e.to_string()),
            Ok(response) if !policy::should_cache(class) => {
                Err(format!("{class:?} response (status {})", response.status))
            }
            Ok(_) if !stored => Err(format!("cache {} no longer exists", self.name)),
            Ok(_) => Ok(()),
        }
    }

    /// Best-effort population: every URL is attempted, failures are collected.
    async fn add_all(&self, urls: Vec<Url>) -> (Vec<Url>, Vec<(Url, String)>) {
        let attempts = urls.into_iter().map(|url| async move {
            let outcome = self.add(url.clone()).await;
            (url, outcome)
        });

        let mut cached = Vec::new();
        let mut failed = Vec::new();
        for (url, outcome) in join_all(attempts).await {
            match outcome {
                Ok(()) => cached.push(url),
                Err(reason) => failed.push((url, reason)),
            }
        }
        (cached, failed)
    }
}

/// One version of the offline worker.
pub struct ShellWorker {
    id: ServiceWorkerId,
    config: WorkerConfig,
    scope: Url,
    shell: Vec<Url>,
    fallback: Url,
    exclusions: ExclusionSet,
    cache: ShellCache,
    clients: Arc<ClientRegistry>,
    skip_waiting: AtomicBool,
}

impl fmt::Debug for ShellWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellWorker")
            .field("id", &self.id)
            .field("version", &self.config.version)
            .field("cache", &self.cache.name)
            .field("scope", &self.scope.as_str())
            .finish()
    }
}

impl ShellWorker {
    /// Create a worker for a validated configuration.
    pub fn new(config: WorkerConfig, deps: WorkerDeps) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        let scope = config.scope_url()?;
        let shell = config.shell_urls()?;
        let fallback = config.fallback_url()?;
        let exclusions = config.exclusions();
        let cache = ShellCache {
            name: config.cache_name(),
            store: deps.store,
            network: deps.network,
            clock: deps.clock,
        };

        Ok(Self {
            id: ServiceWorkerId::new(),
            config,
            scope,
            shell,
            fallback,
            exclusions,
            cache,
            clients: deps.clients,
            skip_waiting: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn cache_name(&self) -> &str {
        &self.cache.name
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Ask the host to activate this version without waiting for pages to close.
    pub fn skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::SeqCst) {
            info!(version = %self.config.version, "Skip waiting requested");
        }
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Open the current cache and populate it with the shell.
    pub async fn on_install(&self) -> Result<InstallReport, ServiceWorkerError> {
        info!(cache = %self.cache.name, assets = self.shell.len(), "Installing");
        self.cache.store.open(&self.cache.name).await?;

        let (cached, failed) = self.cache.add_all(self.shell.clone()).await;
        for (url, reason) in &failed {
            warn!(url = %url, reason = %reason, "Shell asset not cached");
        }

        if self.config.activation == ActivationPolicy::OnInstall {
            self.skip_waiting();
        }

        info!(
            cache = %self.cache.name,
            cached = cached.len(),
            failed = failed.len(),
            "Install complete"
        );
        Ok(InstallReport {
            cache_name: self.cache.name.clone(),
            cached,
            failed,
        })
    }

    fn is_stale(&self, name: &str) -> bool {
        name != self.cache.name
            && match self.config.cleanup {
                CleanupScope::AllOthers => true,
                CleanupScope::SamePrefix => name.starts_with(&self.config.cache_prefix),
            }
    }

    /// Drop superseded caches, then take control of open pages.
    ///
    /// Cleanup failures are reported, never fatal: an orphaned cache only costs quota.
    pub async fn on_activate(&self) -> ActivateReport {
        info!(cache = %self.cache.name, "Activating");
        let mut deleted = Vec::new();
        let mut cleanup_errors = Vec::new();

        match self.cache.store.keys().await {
            Ok(names) => {
                for name in names.into_iter().filter(|n| self.is_stale(n)) {
                    match self.cache.store.delete(&name).await {
                        Ok(true) => {
                            info!(cache = %name, "Removed old cache");
                            deleted.push(name);
                        }
                        Ok(false) => {}
                        Err(error) => {
                            warn!(cache = %name, error = %error, "Could not remove old cache");
                            cleanup_errors.push(CleanupFailure {
                                cache: Some(name),
                                error,
                            });
                        }
                    }
                }
            }
            Err(error) => {
                warn!(error = %error, "Could not list caches");
                cleanup_errors.push(CleanupFailure { cache: None, error });
            }
        }

        let claimed = self.clients.claim(self.id, &self.scope).await;
        info!(clients = claimed.len(), "Now controlling clients");

        ActivateReport {
            cache_name: self.cache.name.clone(),
            deleted,
            cleanup_errors,
            claimed,
        }
    }

    /// Decide how to answer one request.
    pub async fn on_fetch(&self, request: Request) -> FetchOutcome {
        if !policy::is_interceptable_method(&request.method)
            || !policy::is_interceptable_scheme(&request.url)
        {
            trace!(url = %request.url, method = %request.method, "Not intercepting");
            return FetchOutcome::passthrough();
        }
        if self.exclusions.is_excluded(&request.url) {
            debug!(url = %request.url, "Excluded origin, passing through");
            return FetchOutcome::passthrough();
        }

        let url = request.url.clone();
        let is_navigation = request.is_navigation();
        let cached = self.cache.lookup(&request).await;

        let (tx, rx) = oneshot::channel();
        let cache = self.cache.clone();
        let mut wait_until = WaitUntil::new();
        wait_until.spawn("revalidate", async move {
            let result = cache.fetch_and_store(request).await;
            // Nobody listens once a cached copy was served.
            let _ = tx.send(result);
        });

        if let Some(entry) = cached {
            debug!(url = %url, cached_at = entry.cached_at, "Serving from cache");
            return FetchOutcome::respond(entry.response, ResponseSource::Cache, wait_until);
        }

        match rx.await {
            Ok(Ok(response)) => {
                debug!(url = %url, status = %response.status, "Serving from network");
                FetchOutcome::respond(response, ResponseSource::Network, wait_until)
            }
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Network failed with nothing cached");
                self.offline_outcome(is_navigation, wait_until).await
            }
            Err(_) => {
                warn!(url = %url, "Network task ended without a result");
                self.offline_outcome(is_navigation, wait_until).await
            }
        }
    }

    async fn offline_outcome(&self, is_navigation: bool, wait_until: WaitUntil) -> FetchOutcome {
        if is_navigation {
            let shell_request = Request::navigate(self.fallback.clone());
            if let Some(shell) = self.cache.lookup(&shell_request).await {
                debug!(fallback = %self.fallback, "Serving navigation fallback");
                return FetchOutcome::respond(shell.response, ResponseSource::Fallback, wait_until);
            }
        }
        FetchOutcome::respond(Response::offline(), ResponseSource::Offline, wait_until)
    }

    /// Wake every open page so it flushes its queued submissions.
    ///
    /// Returns how many pages were notified.
    pub async fn on_sync(&self, tag: &str) -> usize {
        if tag != self.config.sync_tag {
            debug!(tag, "Ignoring sync tag");
            return 0;
        }
        info!(tag, "Sync triggered");

        let options = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };
        let clients = self.clients.match_all(&options, self.id).await;
        if clients.is_empty() {
            debug!("No open clients to sync");
            return 0;
        }

        let mut notified = 0;
        for client in clients {
            match client.post_message(WorkerMessage::SyncPending) {
                Ok(()) => {
                    debug!(client_id = %client.id, "Sync message sent");
                    notified += 1;
                }
                Err(e) => warn!(client_id = %client.id, error = %e, "Could not notify client"),
            }
        }
        notified
    }

    /// Handle a control message posted by a page.
    pub async fn on_message(&self, data: &Value) -> Result<WaitUntil, ServiceWorkerError> {
        let mut wait_until = WaitUntil::new();
        match ControlMessage::parse(data)? {
            None => trace!("Ignoring message"),
            Some(ControlMessage::SkipWaiting) => self.skip_waiting(),
            Some(ControlMessage::CacheUrls { urls }) => {
                let mut resolved = Vec::with_capacity(urls.len());
                for raw in urls {
                    match self.config.resolve(&raw) {
                        Ok(url) => resolved.push(url),
                        Err(e) => warn!(url = %raw, error = %e, "Skipping URL"),
                    }
                }
                if !resolved.is_empty() {
                    let cache = self.cache.clone();
                    wait_until.spawn("cache-urls", async move {
                        let (cached, failed) = cache.add_all(resolved).await;
                        for (url, reason) in &failed {
                            warn!(url = %url, reason = %reason, "Runtime asset not cached");
                        }
                        info!(cached = cached.len(), failed = failed.len(), "Runtime caching done");
                    });
                }
            }
        }
        Ok(wait_until)
    }

    /// Build the notification for a push. No payload, no notification.
    pub fn on_push(&self, payload: Option<&[u8]>) -> Option<Notification> {
        let data = payload?;
        let parsed = serde_json::from_slice::<PushPayload>(data).unwrap_or_else(|e| {
            warn!(error = %e, "Unreadable push payload, using defaults");
            PushPayload::default()
        });
        Some(Notification::from_payload(parsed, &self.config.notification))
    }
}
