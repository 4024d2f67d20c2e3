//! Per-connection session state machine.
//!
//! A session starts in [`SessionMode::Passive`], where each command line is
//! dispatched on its own. The `interactive` keyword switches to
//! [`SessionMode::Interactive`]: a shell runs on a PTY, input is written to
//! it verbatim, and its output streams back through an [`OutputPump`].
//! `exit`, or the shell ending by itself, returns to passive mode.
//!
//! The session is owned by its connection task; nothing is shared between
//! sessions.

mod context;
mod id;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use context::SessionContext;
pub use id::SessionId;

use crate::dispatch::{CommandDispatcher, CommandResult, DispatcherConfig};
use crate::error::ShellBridgeError;
use crate::output::{FlushPolicy, OutputPump, PumpExit};
use crate::protocol::{ClientMessage, CommandOutput, ServerMessage};
use crate::pty::{PtySize, ShellConfig, ShellPty};
use crate::Result;

/// Keyword that enters interactive mode.
pub const INTERACTIVE_KEYWORD: &str = "interactive";
/// Keyword that leaves interactive mode.
pub const EXIT_KEYWORD: &str = "exit";

/// Everything a session needs to know at construction.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub shell: ShellConfig,
    pub dispatcher: DispatcherConfig,
    pub flush: FlushPolicy,
}

/// Session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Commands are dispatched one at a time.
    Passive,
    /// A PTY-backed shell is attached.
    Interactive,
}

/// The shell and its pump, which exist only together.
struct InteractiveShell {
    pty: ShellPty,
    pump: OutputPump,
}

impl InteractiveShell {
    /// Stop the pump before the PTY it reads from is closed.
    async fn close(&mut self, config: &ShellConfig) {
        self.pump.stop().await;
        self.pty.close(config.terminate_timeout).await;
    }
}

/// One connection's session.
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    context: SessionContext,
    dispatcher: CommandDispatcher,
    outbound: mpsc::Sender<ServerMessage>,
    shell: Option<InteractiveShell>,
}

impl Session {
    /// Create a session from the process's current directory and
    /// environment.
    pub fn new(config: SessionConfig, outbound: mpsc::Sender<ServerMessage>) -> Result<Self> {
        Ok(Self::with_context(config, SessionContext::capture()?, outbound))
    }

    /// Create a session with an explicit starting context.
    pub fn with_context(
        config: SessionConfig,
        context: SessionContext,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(config.dispatcher.clone());
        Self {
            id: SessionId::next(),
            config,
            context,
            dispatcher,
            outbound,
            shell: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn mode(&self) -> SessionMode {
        if self.shell.is_some() {
            SessionMode::Interactive
        } else {
            SessionMode::Passive
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Pid of the interactive shell, if one is running.
    pub fn shell_pid(&self) -> Option<u32> {
        self.shell.as_ref().and_then(|shell| shell.pty.pid())
    }

    /// Send the greeting.
    pub async fn start(&mut self) -> Result<()> {
        let cwd = self.cwd_string();
        let message = format!(
            "Shell bridge - Current directory: {cwd}\n\
             Type 'interactive' to start interactive shell mode."
        );
        send(&self.outbound, ServerMessage::Prompt { cwd, message }).await
    }

    /// Handle one inbound envelope.
    ///
    /// Only a closed outbound channel is an error; everything else is
    /// reported to the client as a result message.
    pub async fn handle(&mut self, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Command { command } => self.handle_command(command.trim()).await,
            ClientMessage::Input { data } => {
                if self.shell.is_some() {
                    self.write_input(data.as_bytes()).await;
                }
                Ok(())
            }
            ClientMessage::Resize { cols, rows } => {
                if let Some(shell) = &self.shell {
                    shell.pty.resize(PtySize::new(rows, cols));
                }
                Ok(())
            }
        }
    }

    /// Resolves when the interactive shell's output ends on its own. Never
    /// resolves while passive.
    pub async fn shell_exited(&mut self) -> PumpExit {
        match self.shell.as_mut() {
            Some(shell) => shell.pump.finished().await,
            None => std::future::pending().await,
        }
    }

    /// Return to passive mode after the shell ended by itself.
    pub async fn on_shell_exit(&mut self) -> Result<()> {
        if self.shell.is_none() {
            return Ok(());
        }
        info!(session = %self.id, "interactive shell exited");
        self.close().await;
        let output = self.mode_change(
            EXIT_KEYWORD,
            CommandResult::success("Shell process exited. Returned to normal mode."),
            false,
        );
        send(&self.outbound, output).await
    }

    /// Release the interactive shell, if any. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut shell) = self.shell.take() {
            debug!(session = %self.id, "closing interactive shell");
            shell.close(&self.config.shell).await;
        }
    }

    async fn handle_command(&mut self, command: &str) -> Result<()> {
        if command.is_empty() {
            return Ok(());
        }

        match (self.mode(), command) {
            (_, INTERACTIVE_KEYWORD) => self.enter_interactive().await,
            (SessionMode::Interactive, EXIT_KEYWORD) => self.leave_interactive().await,
            (SessionMode::Interactive, line) => {
                self.write_input(format!("{line}\n").as_bytes()).await;
                Ok(())
            }
            (SessionMode::Passive, line) => {
                let Some(result) = self.dispatcher.dispatch(line, &mut self.context).await else {
                    return Ok(());
                };
                let output = ServerMessage::Output(CommandOutput {
                    command: line.to_string(),
                    success: result.success,
                    output: result.output,
                    exit_code: result.exit_code,
                    cwd: self.cwd_string(),
                    clear_screen: result.clear_screen,
                    interactive: None,
                });
                send(&self.outbound, output).await
            }
        }
    }

    async fn enter_interactive(&mut self) -> Result<()> {
        if self.shell.is_some() {
            let output = self.mode_change(
                INTERACTIVE_KEYWORD,
                CommandResult::success("Already in interactive mode."),
                true,
            );
            return send(&self.outbound, output).await;
        }

        let (mut pty, reader) = match self.open_shell().await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(session = %self.id, "failed to start interactive shell: {}", e);
                let output = ServerMessage::Output(CommandOutput {
                    command: INTERACTIVE_KEYWORD.to_string(),
                    success: false,
                    output: "Failed to start interactive shell".to_string(),
                    exit_code: 1,
                    cwd: self.cwd_string(),
                    clear_screen: false,
                    interactive: None,
                });
                return send(&self.outbound, output).await;
            }
        };

        // Announce before any shell output can reach the channel.
        let output = self.mode_change(
            INTERACTIVE_KEYWORD,
            CommandResult::success(
                "Interactive shell started. You can now run commands that require input.\n\
                 Type 'exit' to return to normal mode.",
            ),
            true,
        );
        if let Err(e) = send(&self.outbound, output).await {
            pty.close(self.config.shell.terminate_timeout).await;
            return Err(e);
        }

        match OutputPump::spawn(reader, self.config.flush, self.outbound.clone()) {
            Ok(pump) => {
                info!(session = %self.id, pid = ?pty.pid(), "entered interactive mode");
                self.shell = Some(InteractiveShell { pty, pump });
                Ok(())
            }
            Err(e) => {
                pty.close(self.config.shell.terminate_timeout).await;
                Err(e)
            }
        }
    }

    /// Spawn and initialize the shell. Anything opened is released on
    /// failure.
    async fn open_shell(&mut self) -> Result<(ShellPty, Box<dyn std::io::Read + Send>)> {
        let config = &self.config.shell;
        let mut pty = ShellPty::spawn(config, self.context.cwd(), self.context.env())?;

        let opened = match pty.take_reader() {
            Ok(reader) => pty.initialize(config).await.map(|()| reader),
            Err(e) => Err(e),
        };
        match opened {
            Ok(reader) => Ok((pty, reader)),
            Err(e) => {
                pty.close(config.terminate_timeout).await;
                Err(e)
            }
        }
    }

    async fn leave_interactive(&mut self) -> Result<()> {
        self.close().await;
        info!(session = %self.id, "left interactive mode");
        let output = self.mode_change(
            EXIT_KEYWORD,
            CommandResult::success("Exited interactive shell mode"),
            false,
        );
        send(&self.outbound, output).await
    }

    /// Forward bytes to the shell. A failed write is logged and reported
    /// as `false`; the session carries on.
    async fn write_input(&mut self, data: &[u8]) -> bool {
        let Some(shell) = self.shell.as_mut() else {
            return false;
        };
        match shell.pty.write(data).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session = %self.id, "write to shell failed: {}", e);
                false
            }
        }
    }

    /// Result of a mode keyword, tagged with the mode it leaves us in.
    fn mode_change(&self, command: &str, result: CommandResult, interactive: bool) -> ServerMessage {
        ServerMessage::Output(CommandOutput {
            command: command.to_string(),
            success: result.success,
            output: result.output,
            exit_code: result.exit_code,
            cwd: self.cwd_string(),
            clear_screen: false,
            interactive: Some(interactive),
        })
    }

    fn cwd_string(&self) -> String {
        self.context.cwd().to_string_lossy().into_owned()
    }
}

async fn send(outbound: &mpsc::Sender<ServerMessage>, message: ServerMessage) -> Result<()> {
    outbound
        .send(message)
        .await
        .map_err(|_| ShellBridgeError::ChannelClosed)
}
