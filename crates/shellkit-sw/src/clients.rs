//! Clients API: the open pages a worker can see and message.

use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};
use url::Url;

use crate::error::ServiceWorkerError;
use crate::messages::WorkerMessage;
use crate::registration::ServiceWorkerId;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// A page or worker instance.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Worker currently serving this client's fetches.
    pub controller: Option<ServiceWorkerId>,

    sender: mpsc::UnboundedSender<WorkerMessage>,
}

impl Client {
    /// Post message to client.
    pub fn post_message(&self, message: WorkerMessage) -> Result<(), ServiceWorkerError> {
        self.sender
            .send(message)
            .map_err(|_| ServiceWorkerError::state(format!("client {} is closed", self.id)))
    }

    /// Whether the given worker controls this client.
    pub fn is_controlled_by(&self, worker: ServiceWorkerId) -> bool {
        self.controller == Some(worker)
    }
}

/// Options for [`ClientRegistry::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    /// Include clients not controlled by the asking worker.
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Every client open on the origin.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Client>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly opened page. Returns its ID and the page's message inbox.
    pub async fn open(
        &self,
        url: Url,
        client_type: ClientType,
    ) -> (String, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (sender, inbox) = mpsc::unbounded_channel();
        let id = format!("client-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let client = Client {
            id: id.clone(),
            url,
            client_type,
            controller: None,
            sender,
        };
        debug!(client_id = %id, url = %client.url, "Client opened");
        self.clients.write().await.insert(id.clone(), client);
        (id, inbox)
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Remove a client (page closed).
    pub async fn remove(&self, id: &str) -> Option<Client> {
        let removed = self.clients.write().await.remove(id);
        if removed.is_some() {
            debug!(client_id = id, "Client closed");
        }
        removed
    }

    /// Match all clients visible to `worker`.
    pub async fn match_all(
        &self,
        options: &ClientMatchOptions,
        worker: ServiceWorkerId,
    ) -> Vec<Client> {
        let mut matched: Vec<Client> = self
            .clients
            .read()
            .await
            .values()
            .filter(|c| options.include_uncontrolled || c.is_controlled_by(worker))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Take control of every window client inside `scope`. Returns the IDs whose controller changed.
    pub async fn claim(&self, worker: ServiceWorkerId, scope: &Url) -> Vec<String> {
        let mut changed = Vec::new();
        for client in self.clients.write().await.values_mut() {
            if client.client_type != ClientType::Window
                || !client.url.as_str().starts_with(scope.as_str())
                || client.is_controlled_by(worker)
            {
                continue;
            }
            trace!(client_id = %client.id, ?worker, "Claiming client");
            client.controller = Some(worker);
            changed.push(client.id.clone());
        }
        changed.sort();
        changed
    }

    /// Number of clients controlled by `worker`.
    pub async fn controlled_by(&self, worker: ServiceWorkerId) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| c.is_controlled_by(worker))
            .count()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}
