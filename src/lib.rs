//! Real-time chat relay.
//!
//! Clients connect over a WebSocket at `/ws?userId=<id>` and send
//! `send_message` events. Each message is written to the document store
//! first and only then broadcast as `receive_message` to every connected
//! client, the sender included.

pub mod config;
pub mod fanout;
pub mod message;
pub mod observe;
pub mod registry;
pub mod server;
pub mod store;

pub use fanout::{fanout, FanoutReport};
pub use message::{ClientEvent, Message, MessageCandidate, ServerEvent};
pub use observe::{LogObserver, RelayObserver};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use server::{routes, Server};
pub use store::{DocumentStore, MessageStore, StoreError, StoreFailure};
