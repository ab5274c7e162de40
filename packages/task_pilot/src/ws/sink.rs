use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Outbound half of one client connection.
///
/// Cloneable and non-blocking: messages are queued for the connection's
/// writer task. Once the connection is gone every send reports false.
#[derive(Clone, Debug)]
pub struct ClientSink {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

impl ClientSink {
    pub fn new(id: u64) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.tx.send(json).is_ok(),
            Err(e) => {
                warn!("Failed to serialize message for connection {}: {}", self.id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_close() {
        let (sink, mut rx) = ClientSink::new(7);
        assert_eq!(sink.id(), 7);
        assert!(sink.send(&serde_json::json!({"type": "ping"})));
        assert_eq!(rx.try_recv().unwrap(), r#"{"type":"ping"}"#);

        drop(rx);
        assert!(!sink.is_open());
        assert!(!sink.send(&serde_json::json!({})));
    }

    #[test]
    fn test_connection_ids_unique() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert_ne!(a, b);
    }
}
