use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use warp::ws::WebSocket;
use warp::{Filter, Rejection, Reply};

use crate::fanout::{fanout, FanoutReport};
use crate::message::{ClientEvent, MessageCandidate};
use crate::observe::{LogObserver, RelayObserver};
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::store::MessageStore;

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    #[serde(rename = "userId", default)]
    user_id: Option<String>,
}

/// Session handler: owns the registry and the ingest pipeline shared by all connections.
pub struct Server {
    registry: ConnectionRegistry,
    store: Arc<dyn MessageStore>,
    observer: Arc<dyn RelayObserver>,
}

impl Server {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_observer(store, Arc::new(LogObserver))
    }

    pub fn with_observer(store: Arc<dyn MessageStore>, observer: Arc<dyn RelayObserver>) -> Self {
        Server {
            registry: ConnectionRegistry::new(),
            store,
            observer,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Runs one client session until the socket closes. Frames are handled
    /// strictly in arrival order; the next frame is not read until the
    /// previous message has been persisted and broadcast, or dropped.
    pub async fn handle_connection(&self, ws: WebSocket, user_id: String) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = ConnectionHandle::new(tx);
        let connection_id = handle.id();
        self.registry.register(handle, user_id.clone()).await;
        self.observer.connected(connection_id, &user_id);

        // Ends once every clone of the handle is gone, i.e. after deregistration.
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    log::warn!("Failed to send WebSocket message to {connection_id}: {e}");
                    break;
                }
            }
        });

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(msg) if msg.is_close() => break,
                Ok(msg) => {
                    if let Ok(text) = msg.to_str() {
                        self.handle_frame(connection_id, text).await;
                    }
                }
                Err(e) => {
                    log::warn!("WebSocket error on {connection_id}: {e}");
                    break;
                }
            }
        }

        self.registry.deregister(connection_id).await;
        self.observer.disconnected(connection_id);
    }

    async fn handle_frame(&self, connection_id: ConnectionId, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(ClientEvent::SendMessage(candidate)) => {
                log::debug!("Received message from {connection_id}: {candidate:?}");
                self.ingest(connection_id, candidate).await;
            }
            Err(e) => self.observer.frame_rejected(connection_id, text, &e),
        }
    }

    /// Persists the candidate and, only once it is durable, broadcasts it.
    /// Returns `None` when the store failed and the message was dropped.
    pub async fn ingest(
        &self,
        connection_id: ConnectionId,
        candidate: MessageCandidate,
    ) -> Option<FanoutReport> {
        match self.store.persist(candidate).await {
            Ok(message) => {
                self.observer.persisted(connection_id, &message);
                Some(fanout(&message, &self.registry, self.observer.as_ref()).await)
            }
            Err(e) => {
                self.observer.store_failed(connection_id, &e);
                None
            }
        }
    }
}

/// `GET /ws?userId=<id>` upgrades to a relay session.
pub fn routes(server: Arc<Server>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::query::<ConnectQuery>())
        .map(move |ws: warp::ws::Ws, query: ConnectQuery| {
            let server = server.clone();
            ws.on_upgrade(move |socket| async move {
                server
                    .handle_connection(socket, query.user_id.unwrap_or_default())
                    .await;
            })
        });

    ws_route.with(warp::cors().allow_any_origin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::store::{StoreError, StoreFailure};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        writes: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MessageStore for CountingStore {
        async fn persist(&self, candidate: MessageCandidate) -> Result<Message, StoreError> {
            let n = self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError {
                    candidate,
                    cause: StoreFailure::InvalidResponse("down".to_string()),
                });
            }
            let timestamp = candidate.resolve_timestamp();
            Ok(candidate.into_message(format!("m{n}"), timestamp))
        }
    }

    async fn server_with_client(fail: bool) -> (Server, mpsc::UnboundedReceiver<warp::ws::Message>) {
        let store = Arc::new(CountingStore {
            writes: AtomicUsize::new(0),
            fail,
        });
        let server = Server::new(store);
        let (tx, rx) = mpsc::unbounded_channel();
        server
            .registry()
            .register(ConnectionHandle::new(tx), "u1".to_string())
            .await;
        (server, rx)
    }

    #[tokio::test]
    async fn ingest_broadcasts_persisted_message() {
        let (server, mut rx) = server_with_client(false).await;

        let report = server
            .ingest(ConnectionId::new(), MessageCandidate::new("hi", "u1"))
            .await;
        assert_eq!(report, Some(FanoutReport { delivered: 1, failed: 0 }));

        let frame = rx.try_recv().unwrap();
        let frame: serde_json::Value = serde_json::from_str(frame.to_str().unwrap()).unwrap();
        let message: Message = serde_json::from_value(frame["data"].clone()).unwrap();
        assert_eq!(message.id, "m0");
        assert!((Utc::now() - message.timestamp).num_seconds() < 5);
    }

    #[tokio::test]
    async fn ingest_drops_message_when_store_fails() {
        let (server, mut rx) = server_with_client(true).await;

        let report = server
            .ingest(ConnectionId::new(), MessageCandidate::new("hi", "u1"))
            .await;
        assert_eq!(report, None);
        assert!(rx.try_recv().is_err());
        assert_eq!(server.registry().len().await, 1);
    }

    #[tokio::test]
    async fn undecodable_frame_is_ignored() {
        let (server, mut rx) = server_with_client(false).await;

        server.handle_frame(ConnectionId::new(), "not json").await;
        server
            .handle_frame(ConnectionId::new(), r#"{"event":"typing","data":{}}"#)
            .await;
        assert!(rx.try_recv().is_err());
    }
}
