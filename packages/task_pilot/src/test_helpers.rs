//! Test doubles for the collaborators behind the session layer.

use anyhow::Result;
use async_trait::async_trait;
use pty_manager::{PtyConfig, PtyError, PtyExit};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use crate::AppState;
use crate::agent::{AgentBackend, AgentEvent, AgentQuery, BackendError};
use crate::auth::{AuthUser, Authenticator, StaticTokenVerifier};
use crate::chat::ChatOrchestrator;
use crate::config::{FileConfig, ServerConfig};
use crate::docs::MarkdownDocs;
use crate::metrics::ServerMetrics;
use crate::models::{Agent, Conversation, NewConversation, Project, Task};
use crate::notify::{CompletionNotice, CompletionNotifier};
use crate::repository::TaskStore;
use crate::registry::SessionRegistry;
use crate::terminal::{ProcessControl, ProcessSpawner, PtySessionManager, SpawnedProcess};
use crate::ws::ConnectionHub;

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Everything currently queued on a client sink, parsed as JSON.
pub fn drain_json(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(text) = rx.try_recv() {
        out.push(serde_json::from_str(&text).expect("sink carries JSON"));
    }
    out
}

// =============================================================================
// Processes
// =============================================================================

#[derive(Default)]
pub struct FakeControl {
    pid: u32,
    writes: Mutex<Vec<Vec<u8>>>,
    resizes: Mutex<Vec<(u16, u16)>>,
    terminated: AtomicBool,
}

impl FakeControl {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessControl for FakeControl {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        self.writes.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }

    async fn terminate(&self) -> Result<(), PtyError> {
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A spawned fake process; the test drives its output and exit.
pub struct FakeProcess {
    pub config: PtyConfig,
    pub control: Arc<FakeControl>,
    output: mpsc::UnboundedSender<Vec<u8>>,
    exit: Mutex<Option<oneshot::Sender<PtyExit>>>,
}

impl FakeProcess {
    pub fn emit(&self, text: &str) {
        let _ = self.output.send(text.as_bytes().to_vec());
    }

    pub fn exit(&self, exit_code: u32, signal: Option<&str>) {
        if let Some(tx) = self.exit.lock().unwrap().take() {
            let _ = tx.send(PtyExit {
                exit_code,
                signal: signal.map(str::to_string),
            });
        }
    }
}

pub struct FakeSpawner {
    processes: Mutex<Vec<Arc<FakeProcess>>>,
    fail: bool,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }

    pub fn process(&self, index: usize) -> Arc<FakeProcess> {
        self.processes.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ProcessSpawner for FakeSpawner {
    async fn spawn(&self, config: PtyConfig) -> Result<SpawnedProcess, PtyError> {
        if self.fail {
            return Err(PtyError::CreateFailed(format!(
                "No such file or directory: {}",
                config.command
            )));
        }

        let mut processes = self.processes.lock().unwrap();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let control = Arc::new(FakeControl {
            pid: 1000 + processes.len() as u32,
            ..Default::default()
        });

        processes.push(Arc::new(FakeProcess {
            config,
            control: control.clone(),
            output: output_tx,
            exit: Mutex::new(Some(exit_tx)),
        }));

        Ok(SpawnedProcess {
            control,
            output: output_rx,
            exit: exit_rx,
        })
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Default)]
struct MemoryStoreInner {
    projects: HashMap<i64, Project>,
    tasks: HashMap<i64, Task>,
    agents: HashMap<i64, Agent>,
    conversations: HashMap<i64, Conversation>,
    next_conversation_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&self, id: i64, repo_path: &str) {
        self.inner.lock().unwrap().projects.insert(
            id,
            Project {
                id,
                name: format!("project-{}", id),
                repo_path: repo_path.to_string(),
            },
        );
    }

    pub fn add_task(&self, id: i64, project_id: i64, title: &str) {
        self.inner.lock().unwrap().tasks.insert(
            id,
            Task {
                id,
                project_id,
                title: title.to_string(),
                worktree_path: None,
                workflow_complete: false,
            },
        );
    }

    pub fn add_agent(&self, id: i64, agent_type: &str) {
        self.inner.lock().unwrap().agents.insert(
            id,
            Agent {
                id,
                name: format!("agent-{}", id),
                agent_type: agent_type.to_string(),
            },
        );
    }

    pub fn set_workflow_complete(&self, task_id: i64) {
        if let Some(task) = self.inner.lock().unwrap().tasks.get_mut(&task_id) {
            task.workflow_complete = true;
        }
    }

    /// Insert a conversation directly, as if created by another route.
    pub fn add_conversation(&self, task_id: Option<i64>, claude_session_id: Option<&str>) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_conversation_id += 1;
        let id = inner.next_conversation_id;
        let mut conv = NewConversation {
            task_id,
            agent_id: None,
            triggered_by: "user".into(),
        }
        .into_conversation(id);
        conv.claude_session_id = claude_session_id.map(str::to_string);
        inner.conversations.insert(id, conv);
        id
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        let mut all: Vec<_> = self
            .inner
            .lock()
            .unwrap()
            .conversations
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|c| c.id);
        all
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn task(&self, id: i64) -> Result<Option<Task>> {
        Ok(self.inner.lock().unwrap().tasks.get(&id).cloned())
    }

    async fn project(&self, id: i64) -> Result<Option<Project>> {
        Ok(self.inner.lock().unwrap().projects.get(&id).cloned())
    }

    async fn agent(&self, id: i64) -> Result<Option<Agent>> {
        Ok(self.inner.lock().unwrap().agents.get(&id).cloned())
    }

    async fn conversation(&self, id: i64) -> Result<Option<Conversation>> {
        Ok(self.inner.lock().unwrap().conversations.get(&id).cloned())
    }

    async fn create_conversation(&self, new: &NewConversation) -> Result<Conversation> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_conversation_id += 1;
        let conv = new.clone().into_conversation(inner.next_conversation_id);
        inner.conversations.insert(conv.id, conv.clone());
        Ok(conv)
    }

    async fn set_conversation_session(&self, id: i64, claude_session_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let conv = inner
            .conversations
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("Conversation {} not found", id))?;
        conv.claude_session_id = Some(claude_session_id.to_string());
        Ok(())
    }
}

// =============================================================================
// Agent backend
// =============================================================================

/// Backend whose event streams are fed by the test.
#[derive(Default)]
pub struct ScriptedBackend {
    queries: Mutex<Vec<AgentQuery>>,
    streams: Mutex<Vec<mpsc::Sender<AgentEvent>>>,
    aborted: Mutex<Vec<String>>,
    processing: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<AgentQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    pub fn set_processing(&self, ids: &[&str]) {
        *self.processing.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }

    /// Push an event into the stream of query `index`.
    pub async fn emit(&self, index: usize, event: AgentEvent) {
        let tx = self.streams.lock().unwrap()[index].clone();
        tx.send(event).await.expect("orchestrator dropped stream");
    }

    /// Close the stream of query `index` without a terminal event.
    pub fn close(&self, index: usize) {
        let (dead, _) = mpsc::channel(1);
        self.streams.lock().unwrap()[index] = dead;
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn query(&self, query: AgentQuery) -> Result<mpsc::Receiver<AgentEvent>, BackendError> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(BackendError::SpawnFailed("scripted failure".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        self.queries.lock().unwrap().push(query);
        self.streams.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn abort(&self, session_id: &str) -> bool {
        self.aborted.lock().unwrap().push(session_id.to_string());
        self.processing.lock().unwrap().iter().any(|s| s == session_id)
    }

    async fn is_processing(&self, session_id: &str) -> bool {
        self.processing.lock().unwrap().iter().any(|s| s == session_id)
    }

    async fn active_sessions(&self) -> Vec<String> {
        self.processing.lock().unwrap().clone()
    }
}

// =============================================================================
// Notifier
// =============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(AuthUser, CompletionNotice)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<(AuthUser, CompletionNotice)> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(&self, user: &AuthUser, notice: &CompletionNotice) -> Result<()> {
        self.notices
            .lock()
            .unwrap()
            .push((user.clone(), notice.clone()));
        Ok(())
    }
}

// =============================================================================
// App state
// =============================================================================

/// Fully wired state over fakes. Tokens mode: `secret` authenticates as alice.
pub fn test_app_state() -> (AppState, Arc<FakeSpawner>) {
    let fc = FileConfig::default();
    let server_config = ServerConfig::from_file(&fc);
    let metrics = Arc::new(ServerMetrics::new());
    let registry = Arc::new(SessionRegistry::new());
    let hub = Arc::new(ConnectionHub::new());
    let spawner = Arc::new(FakeSpawner::new());

    let terminals = Arc::new(PtySessionManager::new(
        registry.clone(),
        spawner.clone(),
        server_config.terminal.clone(),
        metrics.clone(),
    ));
    let orchestrator = Arc::new(ChatOrchestrator::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MarkdownDocs::new(std::env::temp_dir().join("pilot-test-docs"))),
        Arc::new(ScriptedBackend::new()),
        Arc::new(RecordingNotifier::new()),
        registry.clone(),
        hub.clone(),
        metrics.clone(),
    ));

    let mut tokens = HashMap::new();
    tokens.insert("secret".to_string(), "alice".to_string());
    let authenticator = Arc::new(Authenticator::with_verifier(Arc::new(
        StaticTokenVerifier::new(&tokens),
    )));

    let state = AppState {
        registry,
        terminals,
        orchestrator,
        hub,
        authenticator,
        metrics,
        server_config: Arc::new(server_config),
    };
    (state, spawner)
}
