//! Server metrics for observability
//!
//! Counters for connections, terminal sessions and agent streams, exposed via
//! the health endpoint.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently open WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// Connections dropped for missing a heartbeat
    pub heartbeat_timeouts: AtomicU64,

    // Terminal metrics
    /// Processes spawned under a PTY
    pub terminals_spawned: AtomicU64,
    /// Processes that exited on their own
    pub terminals_exited: AtomicU64,
    /// Detached sessions killed by the idle timer
    pub terminals_evicted: AtomicU64,
    /// Reconnections to a live session
    pub terminals_reattached: AtomicU64,

    // Agent metrics
    pub streams_started: AtomicU64,
    pub streams_ended: AtomicU64,

    // Error metrics
    pub spawn_errors: AtomicU64,
    /// Inbound frames that could not be decoded
    pub message_errors: AtomicU64,

    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn heartbeat_timeout(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn terminal_spawned(&self) {
        self.terminals_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn terminal_exited(&self) {
        self.terminals_exited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn terminal_evicted(&self) {
        self.terminals_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn terminal_reattached(&self) {
        self.terminals_reattached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_started(&self) {
        self.streams_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_ended(&self) {
        self.streams_ended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn spawn_error(&self) {
        self.spawn_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_error(&self) {
        self.message_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
            },
            terminals: TerminalMetrics {
                spawned: self.terminals_spawned.load(Ordering::Relaxed),
                exited: self.terminals_exited.load(Ordering::Relaxed),
                evicted: self.terminals_evicted.load(Ordering::Relaxed),
                reattached: self.terminals_reattached.load(Ordering::Relaxed),
            },
            streams: StreamMetrics {
                started: self.streams_started.load(Ordering::Relaxed),
                ended: self.streams_ended.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                spawn: self.spawn_errors.load(Ordering::Relaxed),
                message: self.message_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub terminals: TerminalMetrics,
    pub streams: StreamMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub heartbeat_timeouts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalMetrics {
    pub spawned: u64,
    pub exited: u64,
    pub evicted: u64,
    pub reattached: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMetrics {
    pub started: u64,
    pub ended: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub spawn: u64,
    pub message: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub terminals: usize,
    pub streaming: usize,
    pub connections: u64,
    pub uptime_secs: u64,
}
