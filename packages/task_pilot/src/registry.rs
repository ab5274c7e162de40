//! Session Registry
//!
//! Owned storage for the two kinds of live session:
//! - terminal sessions keyed by `"<projectPath>_<sessionId|default>"`
//! - streaming agent sessions keyed by the backend's own session id
//!
//! Map mutations go through intention-revealing methods; nothing outside
//! this module touches the maps directly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::terminal::PtySession;

/// Outcome of [`SessionRegistry::attach_or_create_terminal`].
pub enum Attach<T> {
    /// A session already existed for the key
    Existing(Arc<PtySession>),
    /// A new session was created; carries whatever the creator returned
    Created(Arc<PtySession>, T),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingSessionInfo {
    pub claude_session_id: String,
    pub task_id: Option<i64>,
    pub conversation_id: Option<i64>,
    /// Unix millis
    pub started_at: i64,
}

#[derive(Default)]
pub struct SessionRegistry {
    terminals: RwLock<HashMap<String, Arc<PtySession>>>,
    /// One gate per key with a spawn in flight
    pending: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    streaming: RwLock<HashMap<String, StreamingSessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Terminal sessions
    // =========================================================================

    /// Look up `key`, or run `create` and insert its session.
    ///
    /// Concurrent calls for one key queue on a per-key gate, so only one of
    /// them ever runs `create`. The map itself is not locked while `create`
    /// runs; other keys proceed.
    pub async fn attach_or_create_terminal<T, E, F, Fut>(
        &self,
        key: &str,
        create: F,
    ) -> Result<Attach<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(Arc<PtySession>, T), E>>,
    {
        if let Some(existing) = self.terminals.read().await.get(key).cloned() {
            return Ok(Attach::Existing(existing));
        }

        let gate = self.pending_gate(key);
        let result = {
            let _creating = gate.lock().await;
            let existing = self.terminals.read().await.get(key).cloned();
            match existing {
                Some(existing) => Ok(Attach::Existing(existing)),
                None => match create().await {
                    Ok((session, extra)) => {
                        self.terminals
                            .write()
                            .await
                            .insert(key.to_string(), session.clone());
                        debug!("Registered terminal session {}", key);
                        Ok(Attach::Created(session, extra))
                    }
                    Err(e) => Err(e),
                },
            }
        };
        self.release_pending_gate(key, gate);
        result
    }

    fn pending_gate(&self, key: &str) -> Arc<Mutex<()>> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.entry(key.to_string()).or_default().clone()
    }

    fn release_pending_gate(&self, key: &str, gate: Arc<Mutex<()>>) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map and this caller still hold it: nobody else is waiting
        if Arc::strong_count(&gate) == 2 {
            pending.remove(key);
        }
    }

    #[cfg(test)]
    pub async fn terminal(&self, key: &str) -> Option<Arc<PtySession>> {
        self.terminals.read().await.get(key).cloned()
    }

    /// Remove `key` only if it still maps to session `id`.
    ///
    /// A late exit of an old process must not remove its replacement.
    pub async fn remove_terminal_if(&self, key: &str, id: u64) -> bool {
        let mut terminals = self.terminals.write().await;
        match terminals.get(key) {
            Some(session) if session.id() == id => {
                terminals.remove(key);
                debug!("Removed terminal session {}", key);
                true
            }
            _ => false,
        }
    }

    pub async fn terminal_count(&self) -> usize {
        self.terminals.read().await.len()
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or_default()
    }

    // =========================================================================
    // Streaming sessions
    // =========================================================================

    /// Record that the backend is processing `claude_session_id`.
    /// Returns false if it was already recorded.
    pub async fn start_streaming(
        &self,
        claude_session_id: &str,
        task_id: Option<i64>,
        conversation_id: Option<i64>,
    ) -> bool {
        let mut streaming = self.streaming.write().await;
        if streaming.contains_key(claude_session_id) {
            return false;
        }
        streaming.insert(
            claude_session_id.to_string(),
            StreamingSessionInfo {
                claude_session_id: claude_session_id.to_string(),
                task_id,
                conversation_id,
                started_at: chrono::Utc::now().timestamp_millis(),
            },
        );
        true
    }

    /// Remove the streaming entry owned by `conversation_id`, if any.
    pub async fn end_streaming_for_conversation(
        &self,
        conversation_id: i64,
    ) -> Option<StreamingSessionInfo> {
        let mut streaming = self.streaming.write().await;
        let key = streaming
            .iter()
            .find(|(_, info)| info.conversation_id == Some(conversation_id))
            .map(|(key, _)| key.clone())?;
        streaming.remove(&key)
    }

    pub async fn streaming_snapshot(&self) -> Vec<StreamingSessionInfo> {
        let mut sessions: Vec<_> = self.streaming.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub async fn streaming_count(&self) -> usize {
        self.streaming.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeControl, settle};
    use tokio::sync::oneshot;

    fn session(id: u64, key: &str) -> Arc<PtySession> {
        PtySession::detached(id, key, Arc::new(FakeControl::default()))
    }

    #[tokio::test]
    async fn test_spawn_in_flight_does_not_block_other_keys() {
        let registry = Arc::new(SessionRegistry::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let slow = tokio::spawn({
            let registry = registry.clone();
            async move {
                registry
                    .attach_or_create_terminal("/a_default", move || async move {
                        let _ = release_rx.await;
                        Ok::<_, ()>((session(1, "/a_default"), ()))
                    })
                    .await
            }
        });
        settle().await;

        // A second init for the same key queues behind the first
        let waiter = tokio::spawn({
            let registry = registry.clone();
            async move {
                registry
                    .attach_or_create_terminal("/a_default", || async {
                        Ok::<_, ()>((session(2, "/a_default"), ()))
                    })
                    .await
            }
        });
        settle().await;

        let other = registry
            .attach_or_create_terminal("/b_default", || async {
                Ok::<_, ()>((session(3, "/b_default"), ()))
            })
            .await;
        assert!(matches!(other, Ok(Attach::Created(..))));
        assert_eq!(registry.terminal_count().await, 1);
        assert!(!waiter.is_finished());

        release_tx.send(()).unwrap();
        assert!(matches!(slow.await.unwrap(), Ok(Attach::Created(..))));
        match waiter.await.unwrap() {
            Ok(Attach::Existing(s)) => assert_eq!(s.id(), 1),
            _ => panic!("second init should attach to the first session"),
        }
        assert_eq!(registry.terminal_count().await, 2);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_create_registers_nothing() {
        let registry = SessionRegistry::new();
        let result = registry
            .attach_or_create_terminal("/a_default", || async {
                Err::<(Arc<PtySession>, ()), _>("boom")
            })
            .await;
        assert!(matches!(result, Err("boom")));
        assert_eq!(registry.terminal_count().await, 0);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_streaming_lifecycle() {
        let registry = SessionRegistry::new();
        assert!(registry.start_streaming("abc", Some(5), Some(9)).await);
        assert!(!registry.start_streaming("abc", Some(5), Some(9)).await);
        assert!(registry.start_streaming("def", Some(6), Some(10)).await);

        let ended = registry.end_streaming_for_conversation(9).await.unwrap();
        assert_eq!(ended.claude_session_id, "abc");
        assert_eq!(ended.task_id, Some(5));

        let remaining = registry.streaming_snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].conversation_id, Some(10));

        assert!(registry.end_streaming_for_conversation(9).await.is_none());
    }

    #[test]
    fn test_streaming_info_wire_format() {
        let info = StreamingSessionInfo {
            claude_session_id: "abc".into(),
            task_id: Some(5),
            conversation_id: Some(9),
            started_at: 1,
        };
        let json = serde_json::to_value(info).unwrap();
        assert_eq!(json["claudeSessionId"], "abc");
        assert_eq!(json["taskId"], 5);
        assert_eq!(json["conversationId"], 9);
    }
}
