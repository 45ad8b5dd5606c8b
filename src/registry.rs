use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::ws::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Error, Debug)]
#[error("connection {0} is closed")]
pub struct PushError(pub ConnectionId);

/// Outbound side of one live transport session.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        ConnectionHandle {
            id: ConnectionId::new(),
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a frame for the session's writer task.
    pub fn push(&self, message: Message) -> Result<(), PushError> {
        self.outbound.send(message).map_err(|_| PushError(self.id))
    }
}

#[derive(Debug)]
struct Entry {
    handle: ConnectionHandle,
    user_id: String,
}

/// The set of currently connected clients, shared by every session task.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, Entry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering an id that is already present replaces its metadata.
    pub async fn register(&self, handle: ConnectionHandle, user_id: String) {
        let mut connections = self.connections.write().await;
        connections.insert(handle.id(), Entry { handle, user_id });
    }

    /// Returns false when the id was not registered.
    pub async fn deregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        connections.remove(&id).is_some()
    }

    /// A snapshot of every registered connection, in no particular order.
    pub async fn all_connections(&self) -> Vec<ConnectionHandle> {
        let connections = self.connections.read().await;
        connections.values().map(|entry| entry.handle.clone()).collect()
    }

    pub async fn user_id(&self, id: ConnectionId) -> Option<String> {
        let connections = self.connections.read().await;
        connections.get(&id).map(|entry| entry.user_id.clone())
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
