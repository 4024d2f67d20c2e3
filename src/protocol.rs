//! Message envelopes exchanged with the client.
//!
//! Field names are part of the client contract.

use serde::{Deserialize, Serialize};

use crate::pty::PtySize;

fn default_cols() -> u16 {
    PtySize::default().cols
}

fn default_rows() -> u16 {
    PtySize::default().rows
}

/// Inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A command line, or one of the mode keywords `interactive` / `exit`.
    Command { command: String },
    /// Raw keystrokes for the interactive shell.
    Input { data: String },
    /// Window size change for the interactive shell.
    Resize {
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
    },
}

/// Outbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Greeting sent once when the session starts.
    Prompt { cwd: String, message: String },
    /// Result of a command envelope.
    Output(CommandOutput),
    /// A flushed chunk of interactive shell output.
    ShellOutput { output: String, interactive: bool },
}

impl ServerMessage {
    /// Wrap a chunk of interactive output.
    pub fn shell_output(output: impl Into<String>) -> Self {
        Self::ShellOutput {
            output: output.into(),
            interactive: true,
        }
    }
}

/// Body of an `output` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    pub success: bool,
    pub output: String,
    pub exit_code: i32,
    pub cwd: String,
    #[serde(default)]
    pub clear_screen: bool,
    /// Mode after the command; only set by mode transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
}
