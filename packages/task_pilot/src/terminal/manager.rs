//! Terminal session lifecycle.
//!
//! A session outlives the connection that created it. On disconnect the
//! process keeps running and an idle timer is armed; a new `init` for the
//! same key before the timer fires reattaches and replays the buffered
//! output. Process exit or timer expiry removes the session.

use pty_manager::{PtyConfig, PtyError, PtyExit};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::command::{LaunchMode, ShellFamily, compose_command, shell_invocation};
use super::decoder::Utf8StreamDecoder;
use super::output_buffer::OutputBuffer;
use super::protocol::{InitRequest, TerminalServerMessage};
use super::spawner::{ProcessControl, ProcessSpawner};
use super::url_detect::scan_output;
use crate::config::TerminalConfig;
use crate::metrics::ServerMetrics;
use crate::registry::{Attach, SessionRegistry};
use crate::ws::ClientSink;

/// One live process under a PTY, addressable by key.
pub struct PtySession {
    id: u64,
    key: String,
    control: Arc<dyn ProcessControl>,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    attached: Option<ClientSink>,
    buffer: OutputBuffer,
    eviction: Option<AbortHandle>,
    /// Set once the process is gone or being killed
    exited: bool,
}

impl PtySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    #[cfg(test)]
    pub fn pid(&self) -> Option<u32> {
        self.control.pid()
    }

    #[cfg(test)]
    pub async fn attached_connection(&self) -> Option<u64> {
        self.inner.lock().await.attached.as_ref().map(ClientSink::id)
    }

    #[cfg(test)]
    pub async fn buffered_chunks(&self) -> usize {
        self.inner.lock().await.buffer.len()
    }

    /// A detached session around `control`, for registry tests.
    #[cfg(test)]
    pub fn detached(id: u64, key: &str, control: Arc<dyn ProcessControl>) -> Arc<Self> {
        Arc::new(Self {
            id,
            key: key.to_string(),
            control,
            inner: Mutex::new(SessionInner {
                attached: None,
                buffer: OutputBuffer::new(16),
                eviction: None,
                exited: false,
            }),
        })
    }

    async fn is_live_for(&self, connection_id: u64) -> bool {
        let inner = self.inner.lock().await;
        !inner.exited && inner.attached.as_ref().map(ClientSink::id) == Some(connection_id)
    }
}

struct ProcessIo {
    output: mpsc::UnboundedReceiver<Vec<u8>>,
    exit: oneshot::Receiver<PtyExit>,
}

pub struct PtySessionManager {
    registry: Arc<SessionRegistry>,
    spawner: Arc<dyn ProcessSpawner>,
    config: TerminalConfig,
    metrics: Arc<ServerMetrics>,
    family: ShellFamily,
    next_id: AtomicU64,
}

impl PtySessionManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        spawner: Arc<dyn ProcessSpawner>,
        config: TerminalConfig,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            registry,
            spawner,
            config,
            metrics,
            family: ShellFamily::native(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach `sink` to the session addressed by `req`, spawning it if needed.
    ///
    /// Spawn failures are reported to `sink` as an error line and leave no
    /// session behind.
    pub async fn init(self: &Arc<Self>, sink: &ClientSink, req: &InitRequest) -> Option<Arc<PtySession>> {
        let key = req.session_key();

        // A session found dying during reattach is replaced by a fresh spawn
        for _ in 0..2 {
            let attach = self
                .registry
                .attach_or_create_terminal(&key, || self.create_session(&key, req, sink))
                .await;

            match attach {
                Ok(Attach::Existing(session)) => {
                    if self.reattach(&session, sink).await {
                        return Some(session);
                    }
                    self.registry.remove_terminal_if(&key, session.id).await;
                }
                Ok(Attach::Created(session, io)) => {
                    self.metrics.terminal_spawned();
                    tokio::spawn(self.clone().pump(session.clone(), io));
                    return Some(session);
                }
                Err(e) => {
                    warn!("Failed to start terminal session {}: {}", key, e);
                    self.metrics.spawn_error();
                    sink.send(&TerminalServerMessage::error_line(&e.to_string()));
                    return None;
                }
            }
        }
        None
    }

    async fn create_session(
        &self,
        key: &str,
        req: &InitRequest,
        sink: &ClientSink,
    ) -> Result<(Arc<PtySession>, ProcessIo), PtyError> {
        let mode = LaunchMode::from_request(req);
        let command = compose_command(&mode, self.family, &self.config);
        let (program, args) =
            shell_invocation(self.family, self.config.shell.as_deref(), command.as_deref());
        let (cols, rows) = req.geometry();
        let working_dir = resolve_working_dir(req.project_path.as_deref());

        info!(
            "Starting terminal session {} ({:?}) in {:?}",
            key, command, working_dir
        );

        let spawned = self
            .spawner
            .spawn(PtyConfig {
                command: program,
                args,
                working_dir,
                env: Vec::new(),
                rows,
                cols,
            })
            .await?;
        debug!(
            "Terminal session {} running as pid {:?}",
            key,
            spawned.control.pid()
        );

        let session = Arc::new(PtySession {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            key: key.to_string(),
            control: spawned.control,
            inner: Mutex::new(SessionInner {
                attached: Some(sink.clone()),
                buffer: OutputBuffer::new(self.config.buffer_capacity),
                eviction: None,
                exited: false,
            }),
        });

        Ok((
            session,
            ProcessIo {
                output: spawned.output,
                exit: spawned.exit,
            },
        ))
    }

    /// Replace the attached connection and replay the buffer to it.
    /// Returns false if the session is already on its way out.
    async fn reattach(&self, session: &PtySession, sink: &ClientSink) -> bool {
        let mut inner = session.inner.lock().await;
        if inner.exited {
            return false;
        }
        if let Some(timer) = inner.eviction.take() {
            timer.abort();
            debug!("Cancelled idle eviction for {}", session.key);
        }

        // Replay under the lock so live output cannot interleave
        for chunk in inner.buffer.iter() {
            sink.send(&TerminalServerMessage::Output {
                data: chunk.to_string(),
            });
        }
        inner.attached = Some(sink.clone());

        self.metrics.terminal_reattached();
        info!(
            "Reattached connection {} to {} ({} chunks replayed)",
            sink.id(),
            session.key,
            inner.buffer.len()
        );
        true
    }

    /// Connection `connection_id` went away. The process survives until the
    /// idle timer fires.
    pub async fn detach(self: &Arc<Self>, session: &Arc<PtySession>, connection_id: u64) {
        let mut inner = session.inner.lock().await;
        if inner.exited {
            return;
        }
        match &inner.attached {
            Some(sink) if sink.id() == connection_id => {}
            // Someone else owns the session now
            _ => return,
        }
        inner.attached = None;

        if let Some(previous) = inner.eviction.take() {
            previous.abort();
        }

        let manager = self.clone();
        let target = session.clone();
        let timeout = self.config.idle_timeout;
        // Measured from detach, not from when the timer task first runs
        let deadline = tokio::time::Instant::now() + timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            manager.evict(&target).await;
        });
        inner.eviction = Some(timer.abort_handle());

        info!(
            "Detached {} from connection {}; evicting in {:?} unless reattached",
            session.key, connection_id, timeout
        );
    }

    async fn evict(&self, session: &PtySession) {
        {
            let mut inner = session.inner.lock().await;
            if inner.exited || inner.attached.is_some() {
                return;
            }
            // From here the timer can no longer be cancelled
            inner.eviction = None;
            inner.exited = true;
        }

        info!("Idle timeout expired for {}, terminating", session.key);
        if let Err(e) = session.control.terminate().await {
            warn!("Failed to terminate idle session {}: {}", session.key, e);
        }
        self.registry
            .remove_terminal_if(&session.key, session.id)
            .await;
        self.metrics.terminal_evicted();
    }

    /// Forward input from `connection_id`. A no-op unless that connection
    /// is attached to a live process.
    pub async fn input(
        &self,
        session: &PtySession,
        connection_id: u64,
        data: &str,
    ) -> Result<(), PtyError> {
        if !session.is_live_for(connection_id).await {
            return Ok(());
        }
        session.control.write(data.as_bytes()).await
    }

    pub async fn resize(
        &self,
        session: &PtySession,
        connection_id: u64,
        cols: u16,
        rows: u16,
    ) -> Result<(), PtyError> {
        if cols == 0 || rows == 0 || !session.is_live_for(connection_id).await {
            return Ok(());
        }
        session.control.resize(cols, rows).await
    }

    async fn pump(self: Arc<Self>, session: Arc<PtySession>, io: ProcessIo) {
        let ProcessIo {
            mut output,
            mut exit,
        } = io;
        let mut decoder = Utf8StreamDecoder::new();

        let status = loop {
            tokio::select! {
                biased;
                chunk = output.recv() => match chunk {
                    Some(bytes) => self.on_output(&session, &mut decoder, &bytes).await,
                    None => break (&mut exit).await.ok(),
                },
                status = &mut exit => {
                    while let Ok(bytes) = output.try_recv() {
                        self.on_output(&session, &mut decoder, &bytes).await;
                    }
                    break status.ok();
                }
            }
        };

        let status = status.unwrap_or(PtyExit {
            exit_code: 1,
            signal: None,
        });
        self.on_exit(&session, &status).await;
    }

    async fn on_output(&self, session: &PtySession, decoder: &mut Utf8StreamDecoder, bytes: &[u8]) {
        let text = decoder.decode(bytes);
        if text.is_empty() {
            return;
        }

        let mut inner = session.inner.lock().await;
        inner.buffer.push(text.clone());

        if let Some(sink) = inner.attached.as_ref().filter(|s| s.is_open()) {
            let scan = scan_output(&text);
            for url in scan.urls {
                debug!("Detected URL in {}: {}", session.key, url);
                sink.send(&TerminalServerMessage::UrlOpen { url });
            }
            sink.send(&TerminalServerMessage::Output { data: scan.output });
        }
    }

    async fn on_exit(&self, session: &PtySession, status: &PtyExit) {
        let evicted = {
            let mut inner = session.inner.lock().await;
            let evicted = inner.exited;
            inner.exited = true;
            if let Some(timer) = inner.eviction.take() {
                timer.abort();
            }
            if let Some(sink) = inner.attached.as_ref().filter(|s| s.is_open()) {
                sink.send(&TerminalServerMessage::Output {
                    data: exit_notice(status),
                });
            }
            evicted
        };

        self.registry
            .remove_terminal_if(&session.key, session.id)
            .await;
        if !evicted {
            self.metrics.terminal_exited();
        }
        info!(
            "Terminal session {} exited with code {} ({:?})",
            session.key, status.exit_code, status.signal
        );
    }
}

fn exit_notice(status: &PtyExit) -> String {
    match &status.signal {
        Some(signal) => format!(
            "\r\n[Process exited with code {} ({})]\r\n",
            status.exit_code, signal
        ),
        None => format!("\r\n[Process exited with code {}]\r\n", status.exit_code),
    }
}

/// Empty means "inherit the server's working directory".
fn resolve_working_dir(project_path: Option<&str>) -> Option<String> {
    let path = project_path.map(str::trim).filter(|p| !p.is_empty())?;
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return Some(home.join(path.trim_start_matches('~').trim_start_matches('/')).to_string_lossy().to_string());
        }
    }
    Some(path.to_string())
}
