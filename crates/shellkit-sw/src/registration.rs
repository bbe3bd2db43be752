//! Host-side registration: which worker version is installing, waiting or
//! active for a scope, and the state machine between them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use shellkit_net::Request;
use url::Url;

use crate::clients::ClientRegistry;
use crate::error::ServiceWorkerError;
use crate::messages::Notification;
use crate::wait_until::WaitUntil;
use crate::worker::{ActivateReport, FetchOutcome, InstallReport, ShellWorker};

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Install handler running.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activate handler running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, unregistered or failed to install.
    Redundant,
}

impl fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// A worker version and its lifecycle state.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    pub version: String,
    pub state: ServiceWorkerState,
    pub state_changed_at: Instant,
    worker: Arc<ShellWorker>,
}

impl ServiceWorker {
    fn new(worker: ShellWorker) -> Self {
        Self {
            id: worker.id(),
            version: worker.version().to_string(),
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
            worker: Arc::new(worker),
        }
    }

    fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }

    pub fn worker(&self) -> &Arc<ShellWorker> {
        &self.worker
    }
}

/// Events published by a registration.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        version: String,
        new_state: ServiceWorkerState,
    },
    /// Pages switched to a new controller.
    ControllerChange {
        worker_id: ServiceWorkerId,
        client_ids: Vec<String>,
    },
    /// A push asked for a user-visible notification.
    Notification(Notification),
}

/// Which worker a page message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Active,
    Waiting,
}

/// Registration of one scope.
pub struct Registration {
    scope: Url,
    installing: Option<ServiceWorker>,
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
    clients: Arc<ClientRegistry>,
    event_tx: mpsc::UnboundedSender<RegistrationEvent>,
}

impl Registration {
    /// Create an empty registration and its event stream.
    pub fn new(
        scope: Url,
        clients: Arc<ClientRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<RegistrationEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                scope,
                installing: None,
                waiting: None,
                active: None,
                clients,
                event_tx,
            },
            event_rx,
        )
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn installing(&self) -> Option<&ServiceWorker> {
        self.installing.as_ref()
    }

    pub fn waiting(&self) -> Option<&ServiceWorker> {
        self.waiting.as_ref()
    }

    pub fn active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    fn transition(&self, record: &mut ServiceWorker, state: ServiceWorkerState) {
        record.set_state(state);
        debug!(version = %record.version, state = %state, "Worker state changed");
        let _ = self.event_tx.send(RegistrationEvent::StateChange {
            worker_id: record.id,
            version: record.version.clone(),
            new_state: state,
        });
    }

    /// Install a new version.
    ///
    /// On success the version waits; it activates right away when nothing is
    /// active, when it asked to skip waiting, or when no page uses the old one.
    pub async fn install(
        &mut self,
        worker: ShellWorker,
    ) -> Result<InstallReport, ServiceWorkerError> {
        if worker.scope() != &self.scope {
            return Err(ServiceWorkerError::state(format!(
                "worker scope {} does not match registration scope {}",
                worker.scope(),
                self.scope
            )));
        }

        let mut record = ServiceWorker::new(worker);
        self.transition(&mut record, ServiceWorkerState::Installing);
        self.installing = Some(record.clone());

        let result = record.worker().on_install().await;
        self.installing = None;

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                warn!(version = %record.version, error = %e, "Install failed");
                self.transition(&mut record, ServiceWorkerState::Redundant);
                return Err(e);
            }
        };

        if let Some(mut replaced) = self.waiting.take() {
            self.transition(&mut replaced, ServiceWorkerState::Redundant);
        }
        self.transition(&mut record, ServiceWorkerState::Installed);
        let skip_waiting = record.worker().skip_waiting_requested();
        self.waiting = Some(record);

        let takeover = match &self.active {
            None => true,
            Some(active) => skip_waiting || self.clients.controlled_by(active.id).await == 0,
        };
        if takeover {
            self.activate_waiting().await;
        } else {
            info!(cache = %report.cache_name, "Installed version is waiting");
        }

        Ok(report)
    }

    /// Promote the waiting version, retiring the active one.
    pub async fn activate_waiting(&mut self) -> Option<ActivateReport> {
        let mut record = self.waiting.take()?;

        if let Some(mut previous) = self.active.take() {
            self.transition(&mut previous, ServiceWorkerState::Redundant);
        }
        self.transition(&mut record, ServiceWorkerState::Activating);

        let report = record.worker().on_activate().await;

        self.transition(&mut record, ServiceWorkerState::Activated);
        if !report.claimed.is_empty() {
            let _ = self.event_tx.send(RegistrationEvent::ControllerChange {
                worker_id: record.id,
                client_ids: report.claimed.clone(),
            });
        }
        self.active = Some(record);
        Some(report)
    }

    /// Activate the waiting version only if no page is still using the active one.
    pub async fn try_activate_waiting(&mut self) -> Option<ActivateReport> {
        if self.waiting.is_none() {
            return None;
        }
        if let Some(active) = &self.active {
            let in_use = self.clients.controlled_by(active.id).await;
            if in_use > 0 {
                debug!(clients = in_use, "Active worker still in use");
                return None;
            }
        }
        self.activate_waiting().await
    }

    /// A page closed; the waiting version may now take over.
    pub async fn client_closed(&mut self, client_id: &str) -> Option<ActivateReport> {
        self.clients.remove(client_id).await;
        self.try_activate_waiting().await
    }

    /// Deliver a page message to a worker. A waiting worker that asks to skip
    /// waiting is activated before this returns.
    pub async fn post_message(
        &mut self,
        target: MessageTarget,
        data: &Value,
    ) -> Result<WaitUntil, ServiceWorkerError> {
        let slot = match target {
            MessageTarget::Active => self.active.as_ref(),
            MessageTarget::Waiting => self.waiting.as_ref(),
        };
        let worker = slot
            .map(|record| Arc::clone(record.worker()))
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("no {target:?} worker")))?;

        let wait_until = worker.on_message(data).await?;

        if target == MessageTarget::Waiting && worker.skip_waiting_requested() {
            info!(version = %worker.version(), "Skipping waiting, activating new version");
            self.activate_waiting().await;
        }
        Ok(wait_until)
    }

    /// Route a request through the active worker; without one the host fetches natively.
    pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
        match &self.active {
            Some(record) => record.worker().on_fetch(request).await,
            None => FetchOutcome::passthrough(),
        }
    }

    /// Deliver a background sync.
    pub async fn dispatch_sync(&self, tag: &str) -> usize {
        match &self.active {
            Some(record) => record.worker().on_sync(tag).await,
            None => 0,
        }
    }

    /// Deliver a push; the resulting notification is also published as an event.
    pub fn dispatch_push(&self, payload: Option<&[u8]>) -> Option<Notification> {
        let notification = self.active.as_ref()?.worker().on_push(payload)?;
        let _ = self
            .event_tx
            .send(RegistrationEvent::Notification(notification.clone()));
        Some(notification)
    }

    /// Unregister: every version becomes redundant.
    pub fn unregister(&mut self) {
        for mut record in [self.installing.take(), self.waiting.take(), self.active.take()]
            .into_iter()
            .flatten()
        {
            self.transition(&mut record, ServiceWorkerState::Redundant);
        }
    }
}
