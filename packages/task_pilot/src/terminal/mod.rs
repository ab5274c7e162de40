mod command;
mod decoder;
mod manager;
mod output_buffer;
pub mod protocol;
mod spawner;
mod url_detect;

pub use manager::{PtySession, PtySessionManager};
pub use protocol::{Provider, TerminalClientMessage, TerminalServerMessage};
pub use spawner::NativeSpawner;
#[cfg(test)]
pub use spawner::{ProcessControl, ProcessSpawner, SpawnedProcess};
