//! # shell-bridge
//!
//! Bridge a WebSocket connection to a local shell.
//!
//! Each connection gets a [`Session`]. In passive mode every command line
//! runs on its own in the session's working directory, with `cd` and
//! `clear` handled in-process. Sending `interactive` starts a shell on a
//! pseudo-terminal; keystrokes go to it verbatim and its output streams
//! back in coalesced chunks until `exit`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use shell_bridge::{ClientMessage, Session, SessionConfig};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> shell_bridge::Result<()> {
//!     shell_bridge::logging::try_init().ok();
//!
//!     let (tx, mut rx) = mpsc::channel(16);
//!     let mut session = Session::new(SessionConfig::default(), tx)?;
//!
//!     session.start().await?;
//!     session
//!         .handle(ClientMessage::Command {
//!             command: "echo hello".to_string(),
//!         })
//!         .await?;
//!
//!     while let Ok(message) = rx.try_recv() {
//!         println!("{}", serde_json::to_string(&message)?);
//!     }
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod output;
pub mod protocol;
pub mod pty;
pub mod session;

// Re-export commonly used types
pub use dispatch::{CommandDispatcher, CommandResult, DispatcherConfig};
pub use error::{Result, ShellBridgeError};
pub use output::{FlushPolicy, OutputBuffer, OutputPump, PumpExit};
pub use protocol::{ClientMessage, CommandOutput, ServerMessage};
pub use pty::{PtySize, ShellConfig, ShellPty};
pub use session::{Session, SessionConfig, SessionContext, SessionId, SessionMode};
