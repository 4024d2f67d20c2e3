//! Configuration management for shell-bridge.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::dispatch::DispatcherConfig;
use crate::gateway::ServerConfig;
use crate::output::FlushPolicy;
use crate::pty::{PtySize, ShellConfig};
use crate::session::SessionConfig;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Interactive shell configuration.
    pub shell: ShellSection,
    /// Passive command dispatch.
    pub dispatch: DispatchSection,
    /// Output flush thresholds.
    pub pump: PumpSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Interactive shell section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub program: String,
    pub args: Vec<String>,
    /// Value forced into `PS1`.
    pub prompt: String,
    /// Value forced into `TERM`.
    pub term: String,
    pub cols: u16,
    pub rows: u16,
    pub settle_delay_ms: u64,
    pub line_delay_ms: u64,
    /// Grace period between SIGTERM and SIGKILL.
    pub terminate_timeout_ms: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        let shell = ShellConfig::default();
        Self {
            program: shell.program,
            args: shell.args,
            prompt: shell.prompt,
            term: shell.term,
            cols: shell.size.cols,
            rows: shell.size.rows,
            settle_delay_ms: millis(shell.settle_delay),
            line_delay_ms: millis(shell.line_delay),
            terminate_timeout_ms: millis(shell.terminate_timeout),
        }
    }
}

/// Passive dispatch section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// Interpreter that runs passive command lines.
    pub interpreter: String,
    /// First-word fragments that need interactive mode.
    pub interactive_hints: Vec<String>,
}

impl Default for DispatchSection {
    fn default() -> Self {
        let dispatcher = DispatcherConfig::default();
        Self {
            interpreter: dispatcher.interpreter,
            interactive_hints: dispatcher.interactive_hints,
        }
    }
}

/// Output pump section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpSection {
    pub read_chunk: usize,
    pub max_pending_chars: usize,
    pub flush_after_ms: u64,
    pub idle_flush_after_ms: u64,
    pub tick_ms: u64,
}

impl Default for PumpSection {
    fn default() -> Self {
        let policy = FlushPolicy::default();
        Self {
            read_chunk: policy.read_chunk,
            max_pending_chars: policy.max_pending_chars,
            flush_after_ms: millis(policy.flush_after),
            idle_flush_after_ms: millis(policy.idle_flush_after),
            tick_ms: millis(policy.tick),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("SHELL_BRIDGE_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("SHELL_BRIDGE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Some(shell) = var("SHELL_BRIDGE_SHELL").filter(|s| !s.is_empty()) {
            self.shell.program = shell;
        }

        if let Some(level) = var("SHELL_BRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides. Only options given on the command line
    /// take effect.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }

        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref shell) = args.shell {
            self.shell.program = shell.clone();
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// Convert to ServerConfig for the gateway.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        Ok(ServerConfig::new(host, self.server.port))
    }

    /// Settings every new session starts from.
    pub fn session_config(&self) -> SessionConfig {
        let shell = &self.shell;
        let pump = &self.pump;

        SessionConfig {
            shell: ShellConfig {
                program: shell.program.clone(),
                args: shell.args.clone(),
                prompt: shell.prompt.clone(),
                term: shell.term.clone(),
                size: PtySize::new(shell.rows, shell.cols),
                settle_delay: Duration::from_millis(shell.settle_delay_ms),
                line_delay: Duration::from_millis(shell.line_delay_ms),
                terminate_timeout: Duration::from_millis(shell.terminate_timeout_ms),
            },
            dispatcher: DispatcherConfig {
                interpreter: self.dispatch.interpreter.clone(),
                interactive_hints: self.dispatch.interactive_hints.clone(),
            },
            flush: FlushPolicy {
                read_chunk: pump.read_chunk.max(1),
                max_pending_chars: pump.max_pending_chars,
                flush_after: Duration::from_millis(pump.flush_after_ms),
                idle_flush_after: Duration::from_millis(pump.idle_flush_after_ms),
                // A zero period would make the idle timer panic.
                tick: Duration::from_millis(pump.tick_ms.max(1)),
            },
        }
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
        }
    }
}

impl std::error::Error for ConfigError {}
