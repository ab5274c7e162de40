//! Connection Hub
//!
//! Tracks open connections, their session subscriptions, and the lifecycle
//! broadcast channel every connection listens on.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use super::sink::ClientSink;
use crate::chat::ChatServerMessage;
use crate::terminal::Provider;

/// What a connection asked to receive targeted events for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSubscription {
    pub session_id: String,
    pub provider: Provider,
}

pub struct ConnectionHub {
    connections: RwLock<HashMap<u64, ClientSink>>,
    /// At most one subscription per connection
    subscriptions: RwLock<HashMap<u64, ClientSubscription>>,
    lifecycle_tx: broadcast::Sender<ChatServerMessage>,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHub {
    pub fn new() -> Self {
        let (lifecycle_tx, _) = broadcast::channel(256);
        Self {
            connections: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            lifecycle_tx,
        }
    }

    pub async fn register(&self, sink: ClientSink) {
        self.connections.write().await.insert(sink.id(), sink);
    }

    /// Forget a connection along with its subscription.
    pub async fn unregister(&self, connection_id: u64) {
        self.connections.write().await.remove(&connection_id);
        if self
            .subscriptions
            .write()
            .await
            .remove(&connection_id)
            .is_some()
        {
            debug!("Dropped subscription of connection {}", connection_id);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    // =========================================================================
    // Lifecycle broadcast
    // =========================================================================

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<ChatServerMessage> {
        self.lifecycle_tx.subscribe()
    }

    /// Best-effort delivery to every connection. Returns the receiver count.
    pub fn broadcast(&self, msg: ChatServerMessage) -> usize {
        self.lifecycle_tx.send(msg).unwrap_or(0)
    }

    // =========================================================================
    // Targeted delivery
    // =========================================================================

    /// Replace the subscription of `connection_id`.
    pub async fn subscribe_session(&self, connection_id: u64, subscription: ClientSubscription) {
        debug!(
            "Connection {} subscribed to {} ({:?})",
            connection_id, subscription.session_id, subscription.provider
        );
        self.subscriptions
            .write()
            .await
            .insert(connection_id, subscription);
    }

    pub async fn unsubscribe_session(&self, connection_id: u64) -> bool {
        self.subscriptions
            .write()
            .await
            .remove(&connection_id)
            .is_some()
    }

    pub async fn subscription(&self, connection_id: u64) -> Option<ClientSubscription> {
        self.subscriptions.read().await.get(&connection_id).cloned()
    }

    /// Send `msg` to open connections subscribed to `session_id` of
    /// `provider`, skipping `exclude`. Returns how many were reached.
    pub async fn deliver_to_subscribers<T: Serialize>(
        &self,
        session_id: &str,
        provider: Provider,
        msg: &T,
        exclude: Option<u64>,
    ) -> usize {
        let targets: Vec<u64> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|(id, sub)| {
                sub.session_id == session_id && sub.provider == provider && Some(**id) != exclude
            })
            .map(|(id, _)| *id)
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let connections = self.connections.read().await;
        targets
            .iter()
            .filter_map(|id| connections.get(id))
            .filter(|sink| sink.is_open())
            .filter(|sink| sink.send(msg))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::drain_json;

    fn sub(session_id: &str) -> ClientSubscription {
        ClientSubscription {
            session_id: session_id.into(),
            provider: Provider::Claude,
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let hub = ConnectionHub::new();
        let mut a = hub.subscribe_lifecycle();
        let mut b = hub.subscribe_lifecycle();

        let reached = hub.broadcast(ChatServerMessage::SessionUnsubscribed { success: true });
        assert_eq!(reached, 2);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_without_listeners() {
        let hub = ConnectionHub::new();
        assert_eq!(
            hub.broadcast(ChatServerMessage::SessionUnsubscribed { success: true }),
            0
        );
    }

    #[tokio::test]
    async fn test_targeted_delivery() {
        let hub = ConnectionHub::new();
        let (one, mut one_rx) = ClientSink::new(1);
        let (two, mut two_rx) = ClientSink::new(2);
        let (three, mut three_rx) = ClientSink::new(3);
        hub.register(one).await;
        hub.register(two).await;
        hub.register(three).await;

        hub.subscribe_session(1, sub("abc")).await;
        hub.subscribe_session(2, sub("abc")).await;
        hub.subscribe_session(3, sub("other")).await;

        let reached = hub
            .deliver_to_subscribers("abc", Provider::Claude, &serde_json::json!({"type": "x"}), Some(1))
            .await;
        assert_eq!(reached, 1);
        assert!(drain_json(&mut one_rx).is_empty());
        assert_eq!(drain_json(&mut two_rx).len(), 1);
        assert!(drain_json(&mut three_rx).is_empty());
    }

    #[tokio::test]
    async fn test_provider_must_match() {
        let hub = ConnectionHub::new();
        let (one, mut one_rx) = ClientSink::new(1);
        hub.register(one).await;
        hub.subscribe_session(
            1,
            ClientSubscription {
                session_id: "abc".into(),
                provider: Provider::Cursor,
            },
        )
        .await;

        let reached = hub
            .deliver_to_subscribers("abc", Provider::Claude, &serde_json::json!({}), None)
            .await;
        assert_eq!(reached, 0);
        assert!(drain_json(&mut one_rx).is_empty());
    }

    #[tokio::test]
    async fn test_closed_connections_skipped() {
        let hub = ConnectionHub::new();
        let (one, one_rx) = ClientSink::new(1);
        hub.register(one).await;
        hub.subscribe_session(1, sub("abc")).await;
        drop(one_rx);

        let reached = hub
            .deliver_to_subscribers("abc", Provider::Claude, &serde_json::json!({}), None)
            .await;
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn test_unregister_drops_subscription() {
        let hub = ConnectionHub::new();
        let (one, _rx) = ClientSink::new(1);
        hub.register(one).await;
        hub.subscribe_session(1, sub("abc")).await;
        hub.subscribe_session(1, sub("def")).await;
        assert_eq!(hub.subscription(1).await, Some(sub("def")));

        hub.unregister(1).await;
        assert_eq!(hub.subscription(1).await, None);
        assert_eq!(hub.connection_count().await, 0);
        assert!(!hub.unsubscribe_session(1).await);
    }
}
