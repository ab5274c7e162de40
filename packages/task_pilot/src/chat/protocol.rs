//! Wire messages for the `/ws` (agent chat) endpoint.
//!
//! Besides the messages below, every [`AgentEvent`](crate::agent::AgentEvent)
//! is forwarded to the originating client verbatim.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::registry::StreamingSessionInfo;
use crate::terminal::Provider;

/// Messages sent FROM the client TO the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ChatClientMessage {
    ClaudeCommand {
        command: String,
        #[serde(default)]
        options: CommandOptions,
    },
    AbortSession {
        session_id: String,
    },
    CheckSessionStatus {
        session_id: String,
    },
    GetActiveSessions,
    SubscribeSession {
        session_id: String,
        #[serde(default)]
        provider: Provider,
    },
    UnsubscribeSession,
}

/// Options of a `claude-command`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOptions {
    #[serde(default)]
    pub task_id: Option<i64>,
    #[serde(default)]
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub is_new_conversation: bool,
    #[serde(default)]
    pub agent_id: Option<i64>,
    /// Backend session to resume, for ad-hoc commands
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    /// Unrecognized options, accepted and ignored
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Messages sent FROM the server TO the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ChatServerMessage {
    ConversationCreated {
        conversation_id: i64,
        task_id: Option<i64>,
        claude_session_id: String,
    },
    SessionAborted {
        session_id: String,
        success: bool,
    },
    SessionStatus {
        session_id: String,
        is_processing: bool,
    },
    ActiveSessions {
        sessions: Vec<String>,
        streaming: Vec<StreamingSessionInfo>,
    },
    SessionSubscribed {
        session_id: String,
        provider: Provider,
    },
    SessionUnsubscribed {
        success: bool,
    },
    /// Broadcast to every connection
    StreamingStarted {
        task_id: Option<i64>,
        conversation_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        claude_session_id: Option<String>,
    },
    /// Broadcast to every connection
    StreamingEnded {
        task_id: Option<i64>,
        conversation_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        claude_session_id: Option<String>,
    },
    Error {
        error: String,
    },
}
