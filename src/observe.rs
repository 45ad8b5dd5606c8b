use crate::fanout::FanoutReport;
use crate::message::Message;
use crate::registry::{ConnectionId, PushError};
use crate::store::StoreError;

/// Hooks fired by the relay pipeline. None of them can alter its control flow.
pub trait RelayObserver: Send + Sync {
    fn connected(&self, _id: ConnectionId, _user_id: &str) {}

    fn disconnected(&self, _id: ConnectionId) {}

    /// A frame that could not be decoded into a client event.
    fn frame_rejected(&self, _id: ConnectionId, _frame: &str, _error: &serde_json::Error) {}

    fn persisted(&self, _id: ConnectionId, _message: &Message) {}

    fn store_failed(&self, _id: ConnectionId, _error: &StoreError) {}

    fn push_failed(&self, _message: &Message, _error: &PushError) {}

    fn fanout_completed(&self, _message: &Message, _report: &FanoutReport) {}
}

/// Writes every pipeline event through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl RelayObserver for LogObserver {
    fn connected(&self, id: ConnectionId, user_id: &str) {
        log::info!("Client connected: {id}, userId: {user_id:?}");
    }

    fn disconnected(&self, id: ConnectionId) {
        log::info!("Client disconnected: {id}");
    }

    fn frame_rejected(&self, id: ConnectionId, frame: &str, error: &serde_json::Error) {
        log::warn!("Dropping undecodable frame from {id}: {error}; frame: {frame}");
    }

    fn persisted(&self, id: ConnectionId, message: &Message) {
        log::debug!("Message {} from {id} saved", message.id);
    }

    fn store_failed(&self, id: ConnectionId, error: &StoreError) {
        log::error!(
            "Error saving message from {id}: {error}; payload: {:?}",
            error.candidate
        );
    }

    fn push_failed(&self, message: &Message, error: &PushError) {
        log::warn!("Skipping recipient of message {}: {error}", message.id);
    }

    fn fanout_completed(&self, message: &Message, report: &FanoutReport) {
        log::debug!(
            "Broadcast message {} to {} connection(s), {} failed",
            message.id,
            report.delivered,
            report.failed
        );
    }
}
