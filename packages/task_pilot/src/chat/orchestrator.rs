//! Agent conversation orchestration.
//!
//! A `claude-command` is classified once into one of three flows:
//!
//! | options                                   | flow    |
//! |-------------------------------------------|---------|
//! | `conversationId`, not `isNewConversation` | resume  |
//! | `taskId`                                  | fresh   |
//! | neither                                   | ad hoc  |
//!
//! Fresh runs learn their backend session id from the first
//! `session-created` event; resumed runs know it up front and register
//! their streaming session eagerly.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{ChatClientMessage, ChatServerMessage, CommandOptions};
use crate::agent::{AgentBackend, AgentEvent, AgentQuery, BackendError};
use crate::auth::AuthUser;
use crate::docs::DocsProvider;
use crate::metrics::ServerMetrics;
use crate::models::{NewConversation, Task};
use crate::notify::{CompletionNotice, CompletionNotifier};
use crate::registry::SessionRegistry;
use crate::repository::TaskStore;
use crate::terminal::Provider;
use crate::ws::{ClientSubscription, ClientSink, ConnectionHub};

/// Setup failures, reported in-band to the requesting connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Task {0} not found")]
    TaskNotFound(i64),
    #[error("Project {0} not found")]
    ProjectNotFound(i64),
    #[error("Conversation {0} not found")]
    ConversationNotFound(i64),
    #[error("Conversation {0} has no agent session to resume")]
    MissingBackendSession(i64),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// The connection a request came from.
#[derive(Clone)]
pub struct RequestContext {
    pub sink: ClientSink,
    pub user: Option<AuthUser>,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Resume { conversation_id: i64 },
    Fresh { task_id: i64, conversation_id: Option<i64> },
    AdHoc,
}

fn classify(options: &CommandOptions) -> Flow {
    match (options.conversation_id, options.task_id) {
        (Some(conversation_id), _) if !options.is_new_conversation => {
            Flow::Resume { conversation_id }
        }
        (conversation_id, Some(task_id)) => Flow::Fresh {
            task_id,
            conversation_id,
        },
        _ => Flow::AdHoc,
    }
}

/// Bookkeeping for one running query.
struct Run {
    ctx: RequestContext,
    task: Option<Task>,
    agent_id: Option<i64>,
    conversation_id: Option<i64>,
    /// Session id still to be learned from the backend
    fresh: bool,
    claude_session_id: Option<String>,
}

pub struct ChatOrchestrator {
    store: Arc<dyn TaskStore>,
    docs: Arc<dyn DocsProvider>,
    backend: Arc<dyn AgentBackend>,
    notifier: Arc<dyn CompletionNotifier>,
    registry: Arc<SessionRegistry>,
    hub: Arc<ConnectionHub>,
    metrics: Arc<ServerMetrics>,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        docs: Arc<dyn DocsProvider>,
        backend: Arc<dyn AgentBackend>,
        notifier: Arc<dyn CompletionNotifier>,
        registry: Arc<SessionRegistry>,
        hub: Arc<ConnectionHub>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            store,
            docs,
            backend,
            notifier,
            registry,
            hub,
            metrics,
        }
    }

    /// Dispatch one decoded client message. Replies go to `ctx` only.
    pub async fn handle(self: &Arc<Self>, ctx: &RequestContext, msg: ChatClientMessage) {
        match msg {
            ChatClientMessage::ClaudeCommand { command, options } => {
                if let Err(e) = self.start_conversation(ctx.clone(), command, options).await {
                    warn!("Failed to start agent run: {}", e);
                    ctx.sink.send(&ChatServerMessage::Error {
                        error: e.to_string(),
                    });
                }
            }
            ChatClientMessage::AbortSession { session_id } => {
                let success = self.backend.abort(&session_id).await;
                ctx.sink
                    .send(&ChatServerMessage::SessionAborted { session_id, success });
            }
            ChatClientMessage::CheckSessionStatus { session_id } => {
                let is_processing = self.backend.is_processing(&session_id).await;
                ctx.sink.send(&ChatServerMessage::SessionStatus {
                    session_id,
                    is_processing,
                });
            }
            ChatClientMessage::GetActiveSessions => {
                let sessions = self.backend.active_sessions().await;
                let streaming = self.registry.streaming_snapshot().await;
                ctx.sink
                    .send(&ChatServerMessage::ActiveSessions { sessions, streaming });
            }
            ChatClientMessage::SubscribeSession {
                session_id,
                provider,
            } => {
                self.hub
                    .subscribe_session(
                        ctx.sink.id(),
                        ClientSubscription {
                            session_id: session_id.clone(),
                            provider,
                        },
                    )
                    .await;
                ctx.sink.send(&ChatServerMessage::SessionSubscribed {
                    session_id,
                    provider,
                });
            }
            ChatClientMessage::UnsubscribeSession => {
                let success = self.hub.unsubscribe_session(ctx.sink.id()).await;
                ctx.sink
                    .send(&ChatServerMessage::SessionUnsubscribed { success });
            }
        }
    }

    /// Validate, create or resume the conversation, and start the backend.
    ///
    /// On success the returned task drives the event stream to completion.
    /// On error nothing has been registered or broadcast.
    pub async fn start_conversation(
        self: &Arc<Self>,
        ctx: RequestContext,
        command: String,
        options: CommandOptions,
    ) -> Result<JoinHandle<()>, SessionError> {
        let mut query = AgentQuery {
            prompt: command,
            model: options.model.clone(),
            permission_mode: options.permission_mode.clone(),
            ..Default::default()
        };

        let (run, rx) = match classify(&options) {
            Flow::Resume { conversation_id } => {
                let conversation = self
                    .store
                    .conversation(conversation_id)
                    .await?
                    .ok_or(SessionError::ConversationNotFound(conversation_id))?;
                let claude_session_id = conversation
                    .claude_session_id
                    .clone()
                    .ok_or(SessionError::MissingBackendSession(conversation_id))?;

                let task = match conversation.task_id {
                    Some(task_id) => {
                        let task = self
                            .store
                            .task(task_id)
                            .await?
                            .ok_or(SessionError::TaskNotFound(task_id))?;
                        let project = self
                            .store
                            .project(task.project_id)
                            .await?
                            .ok_or(SessionError::ProjectNotFound(task.project_id))?;
                        query.working_dir = Some(task.working_dir(&project).to_string());
                        Some(task)
                    }
                    None => {
                        query.working_dir = options.cwd.clone().or(options.project_path.clone());
                        None
                    }
                };

                query.resume_session_id = Some(claude_session_id.clone());
                query.conversation_id = Some(conversation_id);
                let rx = self.backend.query(query).await?;

                let task_id = task.as_ref().map(|t| t.id);
                if self
                    .registry
                    .start_streaming(&claude_session_id, task_id, Some(conversation_id))
                    .await
                {
                    self.metrics.stream_started();
                    self.hub.broadcast(ChatServerMessage::StreamingStarted {
                        task_id,
                        conversation_id: Some(conversation_id),
                        claude_session_id: Some(claude_session_id.clone()),
                    });
                }

                info!(
                    "Resumed conversation {} (session {})",
                    conversation_id, claude_session_id
                );
                (
                    Run {
                        ctx,
                        task,
                        agent_id: conversation.agent_id.or(options.agent_id),
                        conversation_id: Some(conversation_id),
                        fresh: false,
                        claude_session_id: Some(claude_session_id),
                    },
                    rx,
                )
            }
            Flow::Fresh {
                task_id,
                conversation_id,
            } => {
                let task = self
                    .store
                    .task(task_id)
                    .await?
                    .ok_or(SessionError::TaskNotFound(task_id))?;
                let project = self
                    .store
                    .project(task.project_id)
                    .await?
                    .ok_or(SessionError::ProjectNotFound(task.project_id))?;

                // A caller-supplied id means the record already exists
                let conversation_id = match conversation_id {
                    Some(id) => {
                        debug!("Reusing conversation {} for task {}", id, task_id);
                        id
                    }
                    None => {
                        self.store
                            .create_conversation(&NewConversation::for_task(
                                task_id,
                                options.agent_id,
                            ))
                            .await?
                            .id
                    }
                };

                query.working_dir = Some(task.working_dir(&project).to_string());
                query.append_system_prompt = self.docs.context_prompt(&project, &task).await;
                query.conversation_id = Some(conversation_id);
                let rx = self.backend.query(query).await?;

                info!(
                    "Started conversation {} for task {} ({})",
                    conversation_id, task_id, task.title
                );
                (
                    Run {
                        ctx,
                        task: Some(task),
                        agent_id: options.agent_id,
                        conversation_id: Some(conversation_id),
                        fresh: true,
                        claude_session_id: None,
                    },
                    rx,
                )
            }
            Flow::AdHoc => {
                query.working_dir = options.cwd.clone().or(options.project_path.clone());
                query.resume_session_id = options.session_id.clone();
                let rx = self.backend.query(query).await?;
                (
                    Run {
                        ctx,
                        task: None,
                        agent_id: options.agent_id,
                        conversation_id: None,
                        fresh: false,
                        claude_session_id: options.session_id.clone(),
                    },
                    rx,
                )
            }
        };

        Ok(tokio::spawn(self.clone().stream(run, rx)))
    }

    async fn stream(self: Arc<Self>, mut run: Run, mut rx: mpsc::Receiver<AgentEvent>) {
        while let Some(event) = rx.recv().await {
            if let AgentEvent::SessionCreated { session_id } = &event {
                if run.claude_session_id.is_none() {
                    self.on_session_created(&mut run, session_id).await;
                }
            }

            run.ctx.sink.send(&event);
            if let Some(session_id) = &run.claude_session_id {
                self.hub
                    .deliver_to_subscribers(
                        session_id,
                        Provider::Claude,
                        &event,
                        Some(run.ctx.sink.id()),
                    )
                    .await;
            }

            if event.is_terminal() {
                self.end_streaming(&run).await;
                if matches!(event, AgentEvent::ClaudeComplete { exit_code: 0, .. }) {
                    self.spawn_completion_notice(&run);
                }
                return;
            }
        }

        // Backend went away without a terminal event
        warn!(
            "Agent stream for conversation {:?} closed without completion",
            run.conversation_id
        );
        self.end_streaming(&run).await;
    }

    async fn on_session_created(&self, run: &mut Run, session_id: &str) {
        run.claude_session_id = Some(session_id.to_string());

        let Some(conversation_id) = run.conversation_id else {
            return;
        };
        if !run.fresh {
            return;
        }

        if let Err(e) = self
            .store
            .set_conversation_session(conversation_id, session_id)
            .await
        {
            warn!(
                "Failed to record session {} on conversation {}: {:#}",
                session_id, conversation_id, e
            );
        }

        let task_id = run.task.as_ref().map(|t| t.id);
        if self
            .registry
            .start_streaming(session_id, task_id, Some(conversation_id))
            .await
        {
            self.metrics.stream_started();
            self.hub.broadcast(ChatServerMessage::StreamingStarted {
                task_id,
                conversation_id: Some(conversation_id),
                claude_session_id: Some(session_id.to_string()),
            });
        }

        run.ctx.sink.send(&ChatServerMessage::ConversationCreated {
            conversation_id,
            task_id,
            claude_session_id: session_id.to_string(),
        });
    }

    async fn end_streaming(&self, run: &Run) {
        let Some(conversation_id) = run.conversation_id else {
            return;
        };
        if let Some(info) = self
            .registry
            .end_streaming_for_conversation(conversation_id)
            .await
        {
            self.metrics.stream_ended();
            self.hub.broadcast(ChatServerMessage::StreamingEnded {
                task_id: info.task_id,
                conversation_id: info.conversation_id,
                claude_session_id: Some(info.claude_session_id),
            });
        }
    }

    /// Fire and forget; failures are logged only.
    fn spawn_completion_notice(&self, run: &Run) {
        let (Some(user), Some(task), Some(conversation_id)) =
            (run.ctx.user.clone(), run.task.clone(), run.conversation_id)
        else {
            return;
        };
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let agent_id = run.agent_id;

        tokio::spawn(async move {
            // Re-read: the workflow flag may have changed during the run
            let workflow_complete = match store.task(task.id).await {
                Ok(Some(current)) => current.workflow_complete,
                _ => task.workflow_complete,
            };
            let agent_type = match agent_id {
                Some(id) => store.agent(id).await.ok().flatten().map(|a| a.agent_type),
                None => None,
            }
            .unwrap_or_else(|| "claude".to_string());

            let notice = CompletionNotice {
                task_title: task.title,
                task_id: task.id,
                conversation_id,
                agent_type,
                workflow_complete,
            };
            if let Err(e) = notifier.notify(&user, &notice).await {
                warn!("Completion notification failed: {:#}", e);
            }
        });
    }
}
