mod orchestrator;
pub mod protocol;

pub use orchestrator::{ChatOrchestrator, RequestContext};
pub use protocol::{ChatClientMessage, ChatServerMessage};
