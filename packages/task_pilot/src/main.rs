use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod agent;
mod auth;
mod chat;
mod config;
mod db;
mod docs;
mod handlers;
mod metrics;
mod models;
mod notify;
mod registry;
mod repository;
mod terminal;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::agent::ClaudeCli;
use crate::auth::Authenticator;
use crate::chat::ChatOrchestrator;
use crate::config::{FileConfig, PilotConfig, ServerConfig};
use crate::db::Database;
use crate::docs::MarkdownDocs;
use crate::metrics::ServerMetrics;
use crate::notify::{CompletionNotifier, LogNotifier, WebhookNotifier};
use crate::registry::SessionRegistry;
use crate::repository::ConversationRepository;
use crate::terminal::{NativeSpawner, PtySessionManager};
use crate::ws::ConnectionHub;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "pilot")]
#[command(about = "Session server for driving coding agents against local repositories")]
struct Cli {
    /// Custom data directory (defaults to ~/.taskpilot)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub terminals: Arc<PtySessionManager>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub hub: Arc<ConnectionHub>,
    pub authenticator: Arc<Authenticator>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    /// Server runtime configuration
    pub server_config: Arc<ServerConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "pilot=debug,tower_http=debug,info"
    } else {
        "pilot=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting task pilot");

    let data_dir = config::resolve_data_dir(cli.data_dir.clone())?;
    let file_config: FileConfig = config::load_config(&data_dir)
        .extract()
        .context("Failed to load configuration")?;
    let paths = PilotConfig::new(Some(data_dir), &file_config.storage)?;
    let server_config = Arc::new(ServerConfig::from_file(&file_config));

    // Initialize database
    info!("Initializing database...");
    let db = Database::new(&paths).await?;
    let repository = Arc::new(ConversationRepository::new(db.pool.clone()));

    let notifier: Arc<dyn CompletionNotifier> = match &file_config.notifications.webhook_url {
        Some(url) => {
            info!("Completion notifications go to {}", url);
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => Arc::new(LogNotifier),
    };

    let metrics = Arc::new(ServerMetrics::new());
    let registry = Arc::new(SessionRegistry::new());
    let hub = Arc::new(ConnectionHub::new());

    let terminals = Arc::new(PtySessionManager::new(
        registry.clone(),
        Arc::new(NativeSpawner),
        server_config.terminal.clone(),
        metrics.clone(),
    ));
    let orchestrator = Arc::new(ChatOrchestrator::new(
        repository,
        Arc::new(MarkdownDocs::new(paths.docs_dir.clone())),
        Arc::new(ClaudeCli::new(file_config.agent.claude_bin.clone())),
        notifier,
        registry.clone(),
        hub.clone(),
        metrics.clone(),
    ));
    let authenticator = Arc::new(Authenticator::from_config(&file_config.auth));
    info!("Auth mode: {:?}", file_config.auth.mode);

    let app_state = AppState {
        registry,
        terminals,
        orchestrator,
        hub,
        authenticator: authenticator.clone(),
        metrics,
        server_config,
    };

    let api = Router::new()
        .route(
            "/api/sessions/streaming",
            get(handlers::streaming_sessions_handler),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            authenticator,
            auth::auth_middleware,
        ));

    let app = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(api)
        // `/shell` and `/ws` upgrades; anything else is closed or 404
        .fallback(handlers::websocket_handler)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let host = cli
        .host
        .or(file_config.server.host)
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = cli.port.or(file_config.server.port).unwrap_or(3001);
    let addr = format!("{}:{}", host, port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Task pilot listening on http://{}", actual_addr);
    info!("  WS     /shell                   - Pseudoterminal sessions");
    info!("  WS     /ws                      - Agent chat");
    info!("  GET    /api/sessions/streaming  - Streaming session snapshot");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
