//! WebSocket Connections
//!
//! Every accepted socket gets:
//! - An outbound [`ClientSink`] that session code writes to
//! - The lifecycle broadcast (streaming started/ended)
//! - A heartbeat that drops peers which stop answering pings

mod connection;
mod hub;
mod sink;

pub use connection::{ChatConnection, TerminalConnection, handle_connection};
pub use hub::{ClientSubscription, ConnectionHub};
pub use sink::{ClientSink, next_connection_id};
