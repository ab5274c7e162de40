//! PTY Manager - process lifecycle under a pseudoterminal
//!
//! Spawns a command attached to a PTY and hands back three things: a cloneable
//! [`PtyHandle`] for input/resize/kill, a channel of raw output chunks, and a
//! one-shot exit notification carrying the exit code and terminating signal.
//! There is no session bookkeeping here; callers decide who owns the process.
//!
//! # Example
//!
//! ```no_run
//! use pty_manager::{PtyActor, PtyConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = PtyConfig {
//!         command: "/bin/bash".to_string(),
//!         working_dir: Some("/tmp".to_string()),
//!         ..Default::default()
//!     };
//!
//!     let mut process = PtyActor::spawn(config).unwrap();
//!     process.handle.write(b"echo hello\nexit\n").await.unwrap();
//!
//!     while let Some(chunk) = process.output.recv().await {
//!         print!("{}", String::from_utf8_lossy(&chunk));
//!     }
//!     let exit = process.exit.await.unwrap();
//!     println!("exited with {}", exit.exit_code);
//! }
//! ```

mod error;
pub mod pty;

pub use error::PtyError;
pub use pty::{PtyActor, PtyConfig, PtyExit, PtyHandle, PtyProcess, PtyState};
