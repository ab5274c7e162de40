use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [terminal]
//                    idle_timeout_secs = 600
//
//   env var:         PILOT_TERMINAL__IDLE_TIMEOUT_SECS=600   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub terminal: TerminalFileConfig,
    #[serde(default)]
    pub agent: AgentFileConfig,
    #[serde(default)]
    pub websocket: WebSocketFileConfig,
    #[serde(default)]
    pub notifications: NotificationsFileConfig,
    #[serde(default)]
    pub storage: StorageFileConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// How inbound connections are verified.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthModeKind {
    /// Single tenant: every connection resolves to `default_user`
    #[default]
    Platform,
    /// Multi tenant: a bearer token must resolve through the `tokens` table
    Tokens,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default)]
    pub mode: AuthModeKind,
    #[serde(default = "default_user")]
    pub default_user: String,
    /// token -> username
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            mode: AuthModeKind::Platform,
            default_user: default_user(),
            tokens: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerminalFileConfig {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_buffer_entries")]
    pub buffer_entries: usize,
    /// Shell override; falls back to $SHELL, then the platform default
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default = "default_claude_bin")]
    pub claude_bin: String,
    #[serde(default = "default_cursor_bin")]
    pub cursor_bin: String,
}

impl Default for TerminalFileConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            buffer_entries: default_buffer_entries(),
            shell: None,
            claude_bin: default_claude_bin(),
            cursor_bin: default_cursor_bin(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentFileConfig {
    #[serde(default = "default_claude_bin")]
    pub claude_bin: String,
}

impl Default for AgentFileConfig {
    fn default() -> Self {
        Self {
            claude_bin: default_claude_bin(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebSocketFileConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for WebSocketFileConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationsFileConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageFileConfig {
    /// SQLite database file; defaults to `<data_dir>/pilot.db`
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Markdown documentation root; defaults to `<data_dir>/docs`
    #[serde(default)]
    pub docs_dir: Option<PathBuf>,
}

fn default_user() -> String {
    "platform".to_string()
}
fn default_idle_timeout_secs() -> u64 {
    30 * 60
}
fn default_buffer_entries() -> usize {
    5000
}
fn default_claude_bin() -> String {
    "claude".to_string()
}
fn default_cursor_bin() -> String {
    "cursor-agent".to_string()
}
fn default_heartbeat_secs() -> u64 {
    30
}

/// Build a figment that layers: defaults → config.toml → PILOT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PILOT_AUTH__MODE=tokens`  →  `auth.mode = "tokens"`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("PILOT_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the server)
// =============================================================================

/// `custom_dir`, or `~/.taskpilot`.
pub fn resolve_data_dir(custom_dir: Option<PathBuf>) -> Result<PathBuf> {
    match custom_dir {
        Some(dir) => Ok(dir),
        None => Ok(dirs::home_dir()
            .context("Could not find home directory")?
            .join(".taskpilot")),
    }
}

/// Filesystem layout of the server.
#[derive(Clone, Debug)]
pub struct PilotConfig {
    pub db_path: PathBuf,
    pub docs_dir: PathBuf,
}

impl PilotConfig {
    pub fn new(custom_dir: Option<PathBuf>, storage: &StorageFileConfig) -> Result<Self> {
        let data_dir = resolve_data_dir(custom_dir)?;

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = storage
            .database
            .clone()
            .unwrap_or_else(|| data_dir.join("pilot.db"));
        let docs_dir = storage
            .docs_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("docs"));

        info!("Data directory: {}", data_dir.display());

        Ok(Self {
            db_path,
            docs_dir,
        })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }
}

/// Terminal session settings (runtime view).
#[derive(Clone, Debug)]
pub struct TerminalConfig {
    /// How long a detached session survives before its process is killed
    pub idle_timeout: Duration,
    /// Output ring buffer capacity, in chunks
    pub buffer_capacity: usize,
    pub shell: Option<String>,
    pub claude_bin: String,
    pub cursor_bin: String,
}

impl TerminalConfig {
    pub fn from_file(fc: &TerminalFileConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(fc.idle_timeout_secs),
            buffer_capacity: fc.buffer_entries.max(1),
            shell: fc.shell.clone(),
            claude_bin: fc.claude_bin.clone(),
            cursor_bin: fc.cursor_bin.clone(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self::from_file(&TerminalFileConfig::default())
    }
}

/// Server configuration for runtime behavior.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Ping interval; a connection that misses one pong is dropped
    pub heartbeat_interval: Duration,
    pub terminal: TerminalConfig,
}

impl ServerConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(fc.websocket.heartbeat_secs.max(1)),
            terminal: TerminalConfig::from_file(&fc.terminal),
        }
    }
}
