/// Errors that can occur during PTY operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    /// Failed to open the PTY or spawn the command inside it
    #[error("failed to create PTY: {0}")]
    CreateFailed(String),
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),
    #[error("failed to kill PTY process: {0}")]
    KillFailed(String),
    /// The actor owning the PTY has shut down
    #[error("PTY channel error: {0}")]
    ChannelError(String),
}
