//! # ShellKit Service Worker
//!
//! Offline-resilient interception cache for the CR Attendance app shell.
//!
//! ## Features
//!
//! - **Lifecycle**: versioned install, stale cache cleanup on activate,
//!   explicit or automatic takeover
//! - **Fetch interception**: stale-while-revalidate for the shell, native
//!   pass-through for mutations and excluded origins
//! - **Cache storage**: injectable [`CacheStore`], in-memory
//!   [`MemoryCacheStorage`]
//! - **Clients**: wake open pages on background sync
//! - **Messages**: `SKIP_WAITING`, `CACHE_URLS`, push notifications
//!
//! ## Architecture
//!
//! ```text
//! Registration (host side, one per scope)
//!     ├── installing / waiting / active (ServiceWorker)
//!     │       └── ShellWorker
//!     │               ├── on_install / on_activate
//!     │               ├── on_fetch ──► CacheStore ◄──► Network
//!     │               └── on_sync / on_message / on_push
//!     └── ClientRegistry (open pages)
//! ```
//!
//! Every entry point that leaves work running after it returns hands that
//! work back as a [`WaitUntil`]; the host keeps the worker alive until it
//! settles.

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod messages;
pub mod policy;
pub mod registration;
pub mod wait_until;
pub mod worker;

pub use cache::{normalize_url, Cache, CacheEntry, CacheStore, MemoryCacheStorage, VaryRule};
pub use clients::{Client, ClientMatchOptions, ClientRegistry, ClientType};
pub use config::{ActivationPolicy, CleanupScope, NotificationDefaults, WorkerConfig};
pub use error::{CacheError, ServiceWorkerError};
pub use messages::{ControlMessage, Notification, PushPayload, WorkerMessage};
pub use policy::{
    classify, is_interceptable_method, is_interceptable_scheme, should_cache, ResponseClass,
};
pub use registration::{
    MessageTarget, Registration, RegistrationEvent, ServiceWorker, ServiceWorkerId,
    ServiceWorkerState,
};
pub use wait_until::WaitUntil;
pub use worker::{
    ActivateReport, CleanupFailure, FetchDecision, FetchOutcome, InstallReport, ResponseSource,
    ShellWorker, WorkerDeps,
};
