//! Error types for shell-bridge.

use thiserror::Error;

/// Main error type for shell-bridge operations.
#[derive(Error, Debug)]
pub enum ShellBridgeError {
    /// PTY allocation or control failed.
    #[error("PTY error: {0}")]
    Pty(String),

    /// The shell process could not be spawned.
    #[error("failed to spawn shell: {0}")]
    Spawn(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The outbound message channel is closed.
    #[error("channel closed")]
    ChannelClosed,

    /// An interactive-only operation was attempted while passive.
    #[error("session is not in interactive mode")]
    NotInteractive,

    /// Envelope (de)serialization failed.
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience Result type for shell-bridge operations.
pub type Result<T> = std::result::Result<T, ShellBridgeError>;
