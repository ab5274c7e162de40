use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{AgentBackend, AgentEvent, AgentQuery, BackendError};

/// Agent backend driving the `claude` CLI in stream-json print mode.
///
/// Each query is one child process. Stdout is newline-delimited JSON; every
/// line becomes a `claude-response` event.
pub struct ClaudeCli {
    binary: String,
    /// Backend session id -> cancel token of the run driving it
    active: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl ClaudeCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

pub(crate) fn build_args(query: &AgentQuery) -> Vec<String> {
    let mut args = vec![
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];
    if let Some(id) = &query.resume_session_id {
        args.push("--resume".to_string());
        args.push(id.clone());
    }
    if let Some(model) = &query.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(mode) = &query.permission_mode {
        args.push("--permission-mode".to_string());
        args.push(mode.clone());
    }
    if let Some(prompt) = &query.append_system_prompt {
        args.push("--append-system-prompt".to_string());
        args.push(prompt.clone());
    }
    args.push("--print".to_string());
    args.push(query.prompt.clone());
    args
}

#[async_trait]
impl AgentBackend for ClaudeCli {
    async fn query(&self, query: AgentQuery) -> Result<mpsc::Receiver<AgentEvent>, BackendError> {
        let cancel = CancellationToken::new();

        if let Some(id) = &query.resume_session_id {
            let mut active = self.active.write().await;
            if active.contains_key(id) {
                return Err(BackendError::AlreadyRunning(id.clone()));
            }
            active.insert(id.clone(), cancel.clone());
        }

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(build_args(&query))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &query.working_dir {
            cmd.current_dir(dir);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                if let Some(id) = &query.resume_session_id {
                    self.active.write().await.remove(id);
                }
                return Err(BackendError::SpawnFailed(format!("{}: {}", self.binary, e)));
            }
        };

        info!(
            "Started agent run (resume: {:?}, conversation: {:?})",
            query.resume_session_id, query.conversation_id
        );

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(drive_run(
            child,
            query.resume_session_id,
            tx,
            cancel,
            self.active.clone(),
        ));
        Ok(rx)
    }

    async fn abort(&self, session_id: &str) -> bool {
        match self.active.write().await.remove(session_id) {
            Some(cancel) => {
                info!("Aborting agent session {}", session_id);
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn is_processing(&self, session_id: &str) -> bool {
        self.active.read().await.contains_key(session_id)
    }

    async fn active_sessions(&self) -> Vec<String> {
        self.active.read().await.keys().cloned().collect()
    }
}

async fn drive_run(
    mut child: tokio::process::Child,
    resume_session_id: Option<String>,
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
    active: Arc<RwLock<HashMap<String, CancellationToken>>>,
) {
    let mut session_id = resume_session_id;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("agent stderr: {}", line);
            }
        });
    }

    let Some(stdout) = child.stdout.take() else {
        let _ = tx
            .send(AgentEvent::ClaudeError {
                error: "agent stdout unavailable".to_string(),
            })
            .await;
        return;
    };
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill aborted agent: {}", e);
                }
                if let Some(id) = &session_id {
                    active.write().await.remove(id);
                }
                let _ = tx
                    .send(AgentEvent::ClaudeError {
                        error: "Session aborted".to_string(),
                    })
                    .await;
                return;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let data = match serde_json::from_str::<serde_json::Value>(line) {
                            Ok(value) => value,
                            Err(_) => {
                                debug!("Non-JSON agent output: {}", line);
                                serde_json::Value::String(line.to_string())
                            }
                        };

                        if session_id.is_none() {
                            if let Some(id) = data.get("session_id").and_then(|v| v.as_str()) {
                                session_id = Some(id.to_string());
                                active.write().await.insert(id.to_string(), cancel.clone());
                                let _ = tx
                                    .send(AgentEvent::SessionCreated {
                                        session_id: id.to_string(),
                                    })
                                    .await;
                            }
                        }

                        let _ = tx.send(AgentEvent::ClaudeResponse { data }).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read agent output: {}", e);
                        break;
                    }
                }
            }
        }
    }

    let exit_code = match child.wait().await {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            warn!("Failed to wait for agent: {}", e);
            -1
        }
    };

    if let Some(id) = &session_id {
        active.write().await.remove(id);
    }
    info!("Agent run {:?} finished with code {}", session_id, exit_code);

    let _ = tx
        .send(AgentEvent::ClaudeComplete {
            exit_code,
            session_id,
        })
        .await;
}
