use portable_pty::{
    ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize, native_pty_system,
};
use std::io::{Read, Write};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::PtyError;

/// Configuration for spawning a PTY
#[derive(Clone, Debug)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            command: "/bin/bash".to_string(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            rows: 24,
            cols: 80,
        }
    }
}

/// State of a PTY session
#[derive(Clone, Debug)]
pub struct PtyState {
    pub running: bool,
    pub pid: Option<u32>,
    pub command: String,
    pub rows: u16,
    pub cols: u16,
    /// Unix millis at spawn time
    pub started_at: i64,
}

/// How the process under the PTY ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PtyExit {
    pub exit_code: u32,
    /// Name of the terminating signal, when the platform reports one
    pub signal: Option<String>,
}

/// Everything a caller gets back from a successful spawn.
///
/// `output` yields raw chunks in read order and closes at EOF; `exit` fires
/// once the child has been reaped.
pub struct PtyProcess {
    pub handle: PtyHandle,
    pub output: mpsc::UnboundedReceiver<Vec<u8>>,
    pub exit: oneshot::Receiver<PtyExit>,
}

/// Messages that can be sent to the PTY actor
pub(crate) enum PtyMessage {
    WriteInput {
        data: Vec<u8>,
        respond_to: oneshot::Sender<Result<usize, PtyError>>,
    },
    Resize {
        rows: u16,
        cols: u16,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
    GetState {
        respond_to: oneshot::Sender<PtyState>,
    },
    Kill {
        signal: Option<String>,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
}

/// Handle to communicate with a PTY actor
#[derive(Clone)]
pub struct PtyHandle {
    sender: mpsc::Sender<PtyMessage>,
    pid: Option<u32>,
}

impl PtyHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write data to the PTY
    pub async fn write(&self, data: &[u8]) -> Result<usize, PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::WriteInput {
                data: data.to_vec(),
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::ChannelError("Failed to send write message".into()))?;
        rx.await
            .map_err(|_| PtyError::ChannelError("Failed to receive write response".into()))?
    }

    /// Resize the PTY
    pub async fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::Resize {
                rows,
                cols,
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::ChannelError("Failed to send resize message".into()))?;
        rx.await
            .map_err(|_| PtyError::ChannelError("Failed to receive resize response".into()))?
    }

    /// Get the current state of the PTY
    pub async fn state(&self) -> Result<PtyState, PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| PtyError::ChannelError("Failed to send state message".into()))?;
        rx.await
            .map_err(|_| PtyError::ChannelError("Failed to receive state response".into()))
    }

    /// Kill the PTY process. `None` means SIGTERM.
    pub async fn kill(&self, signal: Option<&str>) -> Result<(), PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::Kill {
                signal: signal.map(|s| s.to_string()),
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::ChannelError("Failed to send kill message".into()))?;
        rx.await
            .map_err(|_| PtyError::ChannelError("Failed to receive kill response".into()))?
    }
}

/// The PTY actor that owns the master side of a single PTY
pub struct PtyActor {
    master: Box<dyn MasterPty + Send>,
    writer: Option<Box<dyn Write + Send>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    state: PtyState,
    receiver: mpsc::Receiver<PtyMessage>,
}

impl PtyActor {
    /// Spawn a command under a new PTY.
    ///
    /// Output is read on a dedicated thread and the child is reaped on
    /// another, so neither blocks the async runtime.
    pub fn spawn(config: PtyConfig) -> Result<PtyProcess, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::CreateFailed(format!("failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&config.command);
        for arg in &config.args {
            cmd.arg(arg);
        }

        if let Some(dir) = &config.working_dir {
            debug!("Setting working directory: {}", dir);
            cmd.cwd(dir);
        }

        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd.env("FORCE_COLOR", "3");

        for key in ["PATH", "HOME", "USER", "SHELL", "LANG"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        info!(
            "Spawning PTY command: {} with args: {:?}",
            config.command, config.args
        );

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", config.command, e);
            PtyError::CreateFailed(e.to_string())
        })?;
        // The slave must not outlive the spawn or the reader never sees EOF
        drop(pair.slave);

        let pid = child.process_id();
        info!("PTY process started with PID: {:?}", pid);

        let killer = child.clone_killer();
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::CreateFailed(format!("failed to clone PTY reader: {}", e)))?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (msg_tx, msg_rx) = mpsc::channel(32);

        std::thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        debug!("PTY EOF detected");
                        break;
                    }
                    Ok(n) => {
                        if output_tx.send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // EIO is how Linux reports a hung-up slave
                        debug!("PTY read ended: {}", e);
                        break;
                    }
                }
            }
        });

        std::thread::spawn(move || {
            let exit = match child.wait() {
                Ok(status) => PtyExit {
                    exit_code: status.exit_code(),
                    signal: exit_signal(&status),
                },
                Err(e) => {
                    warn!("Failed to wait for PTY child: {}", e);
                    PtyExit {
                        exit_code: 1,
                        signal: None,
                    }
                }
            };
            info!(
                "PTY process {:?} exited with code {} signal {:?}",
                pid, exit.exit_code, exit.signal
            );
            let _ = exit_tx.send(exit);
        });

        let mut actor = Self {
            master: pair.master,
            writer: None,
            killer,
            state: PtyState {
                running: true,
                pid,
                command: config.command.clone(),
                rows: config.rows,
                cols: config.cols,
                started_at: chrono::Utc::now().timestamp_millis(),
            },
            receiver: msg_rx,
        };

        tokio::spawn(async move {
            actor.run().await;
        });

        Ok(PtyProcess {
            handle: PtyHandle {
                sender: msg_tx,
                pid,
            },
            output: output_rx,
            exit: exit_rx,
        })
    }

    async fn run(&mut self) {
        debug!(
            "PTY actor started for command: {} with PID: {:?}",
            self.state.command, self.state.pid
        );

        // Take the writer immediately to keep the PTY stdin open
        match self.master.take_writer() {
            Ok(writer) => self.writer = Some(writer),
            Err(e) => error!("Failed to get PTY writer: {}", e),
        }

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                PtyMessage::WriteInput { data, respond_to } => {
                    let _ = respond_to.send(self.handle_write_input(&data));
                }
                PtyMessage::Resize {
                    rows,
                    cols,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.handle_resize(rows, cols));
                }
                PtyMessage::GetState { respond_to } => {
                    let _ = respond_to.send(self.state.clone());
                }
                PtyMessage::Kill { signal, respond_to } => {
                    let result = self.handle_kill(signal);
                    let stop = result.is_ok() && !self.state.running;
                    let _ = respond_to.send(result);
                    if stop {
                        break;
                    }
                }
            }
        }

        debug!("PTY actor shutting down");
    }

    fn handle_write_input(&mut self, data: &[u8]) -> Result<usize, PtyError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PtyError::WriteFailed("No PTY writer available".into()))?;

        writer
            .write_all(data)
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;

        Ok(data.len())
    }

    fn handle_resize(&mut self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;

        self.state.rows = rows;
        self.state.cols = cols;
        Ok(())
    }

    fn handle_kill(&mut self, signal: Option<String>) -> Result<(), PtyError> {
        match signal.as_deref() {
            Some("SIGTERM") | None => self.send_signal(false)?,
            Some("SIGKILL") => self.send_signal(true)?,
            Some("SIGINT") => {
                // Ctrl+C through the line discipline; the process keeps running
                self.handle_write_input(b"\x03")?;
                return Ok(());
            }
            Some(sig) => {
                return Err(PtyError::KillFailed(format!("Unsupported signal: {}", sig)));
            }
        }

        self.state.running = false;
        Ok(())
    }

    /// SIGTERM, or SIGKILL when `force`. Without a pid the child killer is
    /// used, which hangs up the process on unix.
    fn send_signal(&mut self, force: bool) -> Result<(), PtyError> {
        #[cfg(unix)]
        if let Some(pid) = self.state.pid {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
            return kill(Pid::from_raw(pid as i32), signal)
                .map_err(|e| PtyError::KillFailed(e.to_string()));
        }
        #[cfg(not(unix))]
        let _ = force;

        self.killer
            .kill()
            .map_err(|e| PtyError::KillFailed(e.to_string()))
    }
}

/// `ExitStatus` only exposes the terminating signal through `Display`.
fn exit_signal(status: &ExitStatus) -> Option<String> {
    status
        .to_string()
        .strip_prefix("Terminated by ")
        .map(str::to_string)
}
