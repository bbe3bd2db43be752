//! Versioned cache storage.
//!
//! A [`CacheStore`] holds named caches; each [`Cache`] maps a request key
//! (method, normalized URL and the request headers named by the response's
//! `Vary`) to a captured response. The worker only ever talks to the trait,
//! [`MemoryCacheStorage`] is the in-process implementation.

use async_trait::async_trait;
use hashbrown::HashMap;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use shellkit_net::{Request, Response};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::error::CacheError;

/// Strip the fragment; everything else of the URL is significant.
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized
}

/// Request headers a stored response varies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaryRule {
    /// Request header values captured when the entry was stored.
    Headers(Vec<(HeaderName, Option<HeaderValue>)>),
    /// `Vary: *`; the entry never matches a lookup.
    Any,
}

impl VaryRule {
    fn capture(request: &Request, response: &Response) -> Self {
        let mut captured = Vec::new();
        for value in response.headers.get_all(header::VARY) {
            let Ok(value) = value.to_str() else { continue };
            for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                if name == "*" {
                    return Self::Any;
                }
                if let Ok(name) = HeaderName::try_from(name) {
                    let value = request.headers.get(&name).cloned();
                    captured.push((name, value));
                }
            }
        }
        Self::Headers(captured)
    }

    fn matches(&self, request_headers: &HeaderMap) -> bool {
        match self {
            Self::Any => false,
            Self::Headers(headers) => headers
                .iter()
                .all(|(name, value)| request_headers.get(name) == value.as_ref()),
        }
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Normalized request URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Header values the response varies on.
    pub vary: VaryRule,

    /// Headers of the request that produced the response.
    pub request_headers: HeaderMap,

    /// Captured response.
    pub response: Response,

    /// Capture timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response for a request.
    pub fn capture(request: &Request, response: Response, cached_at: u64) -> Self {
        Self {
            url: normalize_url(&request.url),
            method: request.method.clone(),
            vary: VaryRule::capture(request, &response),
            request_headers: request.headers.clone(),
            response,
            cached_at,
        }
    }

    /// Whether this entry answers the request.
    pub fn matches(&self, request: &Request) -> bool {
        request.method == Method::GET
            && self.method == Method::GET
            && self.url == normalize_url(&request.url)
            && self.vary.matches(&request.headers)
    }
}

/// A single named cache.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Entries by normalized URL. Several entries per URL only differ by `Vary`.
    entries: HashMap<String, Vec<CacheEntry>>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        self.entries
            .get(normalize_url(&request.url).as_str())?
            .iter()
            .find(|e| e.matches(request))
    }

    /// Add or replace an entry. Every stored variant that would answer the
    /// new entry's request is dropped first, whatever `Vary` the new response
    /// carries. `Vary: *` variants can never be served and are dropped too.
    pub fn put(&mut self, entry: CacheEntry) {
        let variants = self.entries.entry(entry.url.to_string()).or_default();
        variants
            .retain(|e| e.vary != VaryRule::Any && !e.vary.matches(&entry.request_headers));
        variants.push(entry);
    }

    /// Delete every variant stored for a URL.
    pub fn delete(&mut self, url: &Url) -> bool {
        self.entries.remove(normalize_url(url).as_str()).is_some()
    }

    /// All stored URLs, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    /// Every stored entry.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Host-provided cache storage (the `caches` global).
///
/// Every operation is atomic with respect to the others; concurrent puts to
/// the same key are last-write-wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the named cache if it does not exist.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Delete a cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Names of all caches.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Look up a request in one cache. A missing cache is a miss.
    async fn match_request(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry, creating the cache if needed.
    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError>;

    /// Store an entry only if the named cache still exists. Returns whether
    /// the entry was written.
    async fn put_if_present(&self, name: &str, entry: CacheEntry) -> Result<bool, CacheError>;

    /// All entries of one cache.
    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError>;
}

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        if !caches.contains_key(name) {
            debug!(cache = name, "Creating cache");
            caches.insert(name.to_string(), Cache::new(name));
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut keys: Vec<String> = self.caches.read().await.keys().cloned().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn match_request(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let caches = self.caches.read().await;
        let hit = caches
            .get(name)
            .and_then(|cache| cache.match_request(request))
            .cloned();
        trace!(cache = name, url = %request.url, hit = hit.is_some(), "Cache lookup");
        Ok(hit)
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        trace!(cache = name, url = %entry.url, "Cache put");
        caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
            .put(entry);
        Ok(())
    }

    async fn put_if_present(&self, name: &str, entry: CacheEntry) -> Result<bool, CacheError> {
        let mut caches = self.caches.write().await;
        match caches.get_mut(name) {
            Some(cache) => {
                trace!(cache = name, url = %entry.url, "Cache put");
                cache.put(entry);
                Ok(true)
            }
            None => {
                trace!(cache = name, url = %entry.url, "Cache gone, entry dropped");
                Ok(false)
            }
        }
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError> {
        let caches = self.caches.read().await;
        let cache = caches
            .get(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        Ok(cache.entries().cloned().collect())
    }
}
