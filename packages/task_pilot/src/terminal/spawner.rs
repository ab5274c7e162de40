//! Seam between session management and real PTY processes.

use async_trait::async_trait;
use pty_manager::{PtyActor, PtyConfig, PtyError, PtyExit, PtyHandle};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Control surface of a running process.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    fn pid(&self) -> Option<u32>;
    async fn write(&self, data: &[u8]) -> Result<(), PtyError>;
    async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError>;
    /// Force-kill the process.
    async fn terminate(&self) -> Result<(), PtyError>;
}

pub struct SpawnedProcess {
    pub control: Arc<dyn ProcessControl>,
    pub output: mpsc::UnboundedReceiver<Vec<u8>>,
    pub exit: oneshot::Receiver<PtyExit>,
}

#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, config: PtyConfig) -> Result<SpawnedProcess, PtyError>;
}

/// Spawns processes under a real pseudoterminal.
pub struct NativeSpawner;

#[async_trait]
impl ProcessSpawner for NativeSpawner {
    async fn spawn(&self, config: PtyConfig) -> Result<SpawnedProcess, PtyError> {
        // fork/exec stays off the runtime worker threads
        let process = tokio::task::spawn_blocking(move || PtyActor::spawn(config))
            .await
            .map_err(|e| PtyError::CreateFailed(format!("spawn task failed: {}", e)))??;
        Ok(SpawnedProcess {
            control: Arc::new(process.handle),
            output: process.output,
            exit: process.exit,
        })
    }
}

#[async_trait]
impl ProcessControl for PtyHandle {
    fn pid(&self) -> Option<u32> {
        PtyHandle::pid(self)
    }

    async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        PtyHandle::write(self, data).await.map(|_| ())
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        PtyHandle::resize(self, rows, cols).await
    }

    async fn terminate(&self) -> Result<(), PtyError> {
        self.kill(Some("SIGKILL")).await
    }
}
