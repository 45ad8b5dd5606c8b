use warp::ws::Message as Frame;

use crate::message::{Message, ServerEvent};
use crate::observe::RelayObserver;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Pushes a `receive_message` event for `message` to every connection
/// registered at the time of the call, the sender included. A recipient whose
/// session is already gone is skipped and does not stop the rest.
pub async fn fanout(
    message: &Message,
    registry: &ConnectionRegistry,
    observer: &dyn RelayObserver,
) -> FanoutReport {
    let mut report = FanoutReport::default();

    let frame = match serde_json::to_string(&ServerEvent::ReceiveMessage(message)) {
        Ok(text) => Frame::text(text),
        Err(e) => {
            log::error!("Failed to encode message {}: {e}", message.id);
            return report;
        }
    };

    for recipient in registry.all_connections().await {
        match recipient.push(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                observer.push_failed(message, &e);
            }
        }
    }

    observer.fanout_completed(message, &report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageCandidate;
    use crate::observe::LogObserver;
    use crate::registry::{ConnectionHandle, ConnectionId, PushError};
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FailedPushes(Mutex<Vec<ConnectionId>>);

    impl RelayObserver for FailedPushes {
        fn push_failed(&self, _message: &Message, error: &PushError) {
            self.0.lock().unwrap().push(error.0);
        }
    }

    fn message() -> Message {
        MessageCandidate::new("hi", "u1").into_message("m1".to_string(), Utc::now())
    }

    async fn connect(
        registry: &ConnectionRegistry,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx);
        let id = handle.id();
        registry.register(handle, String::new()).await;
        (id, rx)
    }

    fn decode(frame: &Frame) -> Value {
        serde_json::from_str(frame.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn every_recipient_gets_one_frame() {
        let registry = ConnectionRegistry::new();
        let (_, mut rx_a) = connect(&registry).await;
        let (_, mut rx_b) = connect(&registry).await;
        let message = message();

        let report = fanout(&message, &registry, &LogObserver).await;
        assert_eq!(report, FanoutReport { delivered: 2, failed: 0 });

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = decode(&rx.try_recv().unwrap());
            assert_eq!(frame["event"], "receive_message");
            assert_eq!(frame["data"]["_id"], "m1");
            assert_eq!(frame["data"]["content"], "hi");
            assert_eq!(frame["data"]["isRead"], json!(false));
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn closed_recipient_does_not_stop_the_rest() {
        let registry = ConnectionRegistry::new();
        let (closed, rx_closed) = connect(&registry).await;
        let (_, mut rx_live) = connect(&registry).await;
        drop(rx_closed);

        let observer = FailedPushes::default();
        let report = fanout(&message(), &registry, &observer).await;

        assert_eq!(report, FanoutReport { delivered: 1, failed: 1 });
        assert_eq!(*observer.0.lock().unwrap(), vec![closed]);
        assert!(rx_live.try_recv().is_ok());
    }

    #[tokio::test]
    async fn empty_registry() {
        let report = fanout(&message(), &ConnectionRegistry::new(), &LogObserver).await;
        assert_eq!(report, FanoutReport::default());
    }

    #[tokio::test]
    async fn late_registration_misses_the_broadcast() {
        let registry = ConnectionRegistry::new();
        let (_, mut rx_early) = connect(&registry).await;

        fanout(&message(), &registry, &LogObserver).await;
        let (_, mut rx_late) = connect(&registry).await;

        assert!(rx_early.try_recv().is_ok());
        assert!(rx_late.try_recv().is_err());
    }
}
