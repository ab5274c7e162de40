use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One invocation of the agent backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentQuery {
    pub prompt: String,
    pub working_dir: Option<String>,
    /// Continue an existing backend session instead of starting a new one
    pub resume_session_id: Option<String>,
    pub append_system_prompt: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    /// Conversation this run belongs to, if any
    pub conversation_id: Option<i64>,
}

/// Events produced by the backend while a query runs.
///
/// These are forwarded to clients as-is, so the serialized shape is part of
/// the wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    /// The backend assigned its own id to a new session
    SessionCreated { session_id: String },
    /// One raw message from the agent's output stream
    ClaudeResponse { data: serde_json::Value },
    ClaudeComplete {
        exit_code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    ClaudeError { error: String },
}

impl AgentEvent {
    /// Complete and error both end a streaming session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::ClaudeComplete { .. } | AgentEvent::ClaudeError { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to start agent: {0}")]
    SpawnFailed(String),
    #[error("agent session {0} is already running")]
    AlreadyRunning(String),
}

/// Black-box agent capability: a prompt in, an event stream out.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Start a query. The returned channel closes after a terminal event.
    async fn query(&self, query: AgentQuery) -> Result<mpsc::Receiver<AgentEvent>, BackendError>;
    /// Abort a running session. Returns false if nothing was running.
    async fn abort(&self, session_id: &str) -> bool;
    async fn is_processing(&self, session_id: &str) -> bool;
    async fn active_sessions(&self) -> Vec<String>;
}
