//! Wire messages for the `/shell` endpoint.

use serde::{Deserialize, Serialize};

/// Messages sent FROM the client TO the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalClientMessage {
    Init(InitRequest),
    Input { data: String },
    Resize { cols: u16, rows: u16 },
}

/// Agent CLI launched inside the terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Claude,
    Cursor,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Resume `session_id` in the agent CLI rather than starting fresh
    #[serde(default)]
    pub has_session: bool,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub initial_command: Option<String>,
    #[serde(default)]
    pub is_plain_shell: bool,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
}

impl InitRequest {
    /// Registry key for the session this request addresses.
    pub fn session_key(&self) -> String {
        session_key(self.project_path.as_deref().unwrap_or(""), self.session_id.as_deref())
    }

    pub fn geometry(&self) -> (u16, u16) {
        (
            self.cols.filter(|c| *c > 0).unwrap_or(80),
            self.rows.filter(|r| *r > 0).unwrap_or(24),
        )
    }
}

pub fn session_key(project_path: &str, session_id: Option<&str>) -> String {
    format!("{}_{}", project_path, session_id.unwrap_or("default"))
}

/// Messages sent FROM the server TO the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalServerMessage {
    Output { data: String },
    UrlOpen { url: String },
}

impl TerminalServerMessage {
    /// Output line styled as an error (red).
    pub fn error_line(message: &str) -> Self {
        TerminalServerMessage::Output {
            data: format!("\r\n\x1b[31mError: {}\x1b[0m\r\n", message),
        }
    }
}
