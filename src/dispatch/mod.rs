//! Passive-mode command dispatch.
//!
//! A command line is handled in one of four ways:
//! - `clear` is answered directly with a clear-display result;
//! - `cd` updates the session's working directory;
//! - commands whose first word looks like it needs a terminal are refused
//!   with a hint to switch to interactive mode;
//! - everything else runs to completion through the command interpreter.

mod words;

use std::path::PathBuf;
use std::process::Stdio;

use tracing::debug;

use crate::session::SessionContext;
use crate::Result;

pub use words::{expand_tilde, normalize_path};

/// Words that suggest a command wants a real terminal.
pub const DEFAULT_INTERACTIVE_HINTS: &[&str] = &[
    "sudo",
    "su",
    "ssh",
    "mysql",
    "psql",
    "passwd",
    "python3",
    "python",
    "node",
    "npm login",
    "git push",
    "docker login",
];

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Interpreter used as `<interpreter> -c <line>`.
    pub interpreter: String,
    /// A command is refused when its first word contains any of these.
    pub interactive_hints: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interpreter: "/bin/sh".to_string(),
            interactive_hints: DEFAULT_INTERACTIVE_HINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Outcome of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub exit_code: i32,
    pub clear_screen: bool,
}

impl CommandResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            exit_code: 0,
            clear_screen: false,
        }
    }

    pub fn failure(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            success: false,
            output: output.into(),
            exit_code,
            clear_screen: false,
        }
    }

    pub fn clear_screen() -> Self {
        Self {
            clear_screen: true,
            ..Self::success("")
        }
    }
}

/// Handles one passive-mode command line at a time.
#[derive(Debug, Clone, Default)]
pub struct CommandDispatcher {
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// The hint matched by `first_word`, if any.
    ///
    /// Matching is by substring, so `nodejs` matches `node` and `issue`
    /// matches `su`. Hints containing spaces can never match a single word.
    pub fn interactive_hint(&self, first_word: &str) -> Option<&str> {
        self.config
            .interactive_hints
            .iter()
            .find(|hint| first_word.contains(hint.as_str()))
            .map(String::as_str)
    }

    /// Run `line` against the session context.
    ///
    /// Returns `None` for a blank line. Never fails: errors become a
    /// failed result with exit code 1.
    pub async fn dispatch(&self, line: &str, ctx: &mut SessionContext) -> Option<CommandResult> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match self.try_dispatch(line, ctx).await {
            Ok(result) => Some(result),
            Err(e) => Some(CommandResult::failure(format!("Error: {e}"), 1)),
        }
    }

    async fn try_dispatch(&self, line: &str, ctx: &mut SessionContext) -> Result<CommandResult> {
        if line == "clear" {
            return Ok(CommandResult::clear_screen());
        }

        let (first, rest) = match line.split_once(char::is_whitespace) {
            Some((first, rest)) => (first, rest),
            None => (line, ""),
        };

        if first == "cd" {
            return Ok(change_directory(rest, ctx));
        }

        if let Some(hint) = self.interactive_hint(first) {
            debug!(command = first, hint, "refusing command that needs a terminal");
            return Ok(CommandResult::failure(
                format!(
                    "⚠️  Command '{first}' typically requires user input.\n\
                     Switch to interactive mode first by typing: interactive\n\
                     Then run your command again."
                ),
                1,
            ));
        }

        self.run_subprocess(line, ctx).await
    }

    /// Run `line` through the interpreter with stderr folded into stdout.
    async fn run_subprocess(&self, line: &str, ctx: &SessionContext) -> Result<CommandResult> {
        debug!(command = line, cwd = %ctx.cwd().display(), "running command");

        let output = tokio::process::Command::new(&self.config.interpreter)
            .arg("-c")
            .arg(format!("exec 2>&1\n{line}"))
            .current_dir(ctx.cwd())
            .env_clear()
            .envs(ctx.env())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let exit_code = exit_code(&output.status);
        Ok(CommandResult {
            success: output.status.success(),
            output: text,
            exit_code,
            clear_screen: false,
        })
    }
}

/// `cd` with no argument goes home; relative targets resolve against the
/// current directory. The directory only changes if the target exists.
fn change_directory(args: &str, ctx: &mut SessionContext) -> CommandResult {
    let words = match shell_words::split(args) {
        Ok(words) => words,
        Err(e) => return CommandResult::failure(format!("cd: {e}"), 1),
    };

    let home = ctx.home_dir();
    let target = match words.first() {
        Some(word) => expand_tilde(word, &home),
        None => home,
    };
    let target = if target.is_absolute() {
        target
    } else {
        ctx.cwd().join(target)
    };
    let target: PathBuf = normalize_path(&target);

    if target.is_dir() {
        ctx.set_cwd(target);
        CommandResult::success(format!("Changed directory to: {}", ctx.cwd().display()))
    } else {
        CommandResult::failure(
            format!("cd: no such file or directory: {}", target.display()),
            1,
        )
    }
}

#[cfg(unix)]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
