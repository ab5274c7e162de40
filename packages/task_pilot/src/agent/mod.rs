mod backend;
mod claude_cli;

pub use backend::{AgentBackend, AgentEvent, AgentQuery, BackendError};
pub use claude_cli::ClaudeCli;
