//! PTY-backed interactive shell.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty};
use tracing::{debug, info, warn};

use super::process_group::Signal;
#[cfg(unix)]
use super::{PollingReader, ProcessGroup};
use super::PtySize;
use crate::error::ShellBridgeError;
use crate::Result;

/// How often teardown checks whether the shell has exited.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Longest a PTY read blocks before the reader thread rechecks its stop flag.
#[cfg(unix)]
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How the interactive shell is launched and quieted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    /// Shell executable.
    pub program: String,
    /// Arguments passed to the shell.
    pub args: Vec<String>,
    /// Prompt forced through `PS1`.
    pub prompt: String,
    /// Terminal type advertised through `TERM`.
    pub term: String,
    /// Initial window size.
    pub size: PtySize,
    /// Pause between spawning the shell and the first setup line.
    pub settle_delay: Duration,
    /// Pause after each setup line.
    pub line_delay: Duration,
    /// Grace period between SIGTERM and SIGKILL on close.
    pub terminate_timeout: Duration,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "/bin/bash".to_string(),
            args: vec!["--noprofile".to_string(), "--norc".to_string()],
            prompt: r"\u@\h:\w\$ ".to_string(),
            term: "dumb".to_string(),
            size: PtySize::default(),
            settle_delay: Duration::from_millis(100),
            line_delay: Duration::from_millis(50),
            terminate_timeout: Duration::from_secs(2),
        }
    }
}

impl ShellConfig {
    /// Environment for the shell: `base` plus the quiet-terminal overrides.
    pub fn shell_env(&self, base: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env = base.clone();
        env.insert("HISTFILE".into(), String::new());
        env.insert("PS1".into(), self.prompt.clone());
        env.insert("TERM".into(), self.term.clone());
        env.insert("COLUMNS".into(), self.size.cols.to_string());
        env.insert("LINES".into(), self.size.rows.to_string());
        env
    }

    /// Lines typed into a fresh shell, for settings that cannot be passed
    /// through the environment.
    pub fn setup_lines(&self) -> Vec<String> {
        vec![
            "unset HISTFILE".to_string(),
            "set +H".to_string(),
            format!("export PS1='{}'", self.prompt.replace('\'', r"'\''")),
            "clear".to_string(),
        ]
    }
}

/// One PTY pair plus the shell running on its secondary side.
///
/// All handles are present from a successful [`ShellPty::spawn`] until
/// [`ShellPty::close`]; closing is idempotent. Dropping an unclosed shell
/// kills its process group.
pub struct ShellPty {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Arc<Mutex<Box<dyn Write + Send>>>>,
    child: Option<Box<dyn Child + Send + Sync>>,
    #[cfg(unix)]
    group: Option<ProcessGroup>,
    pid: Option<u32>,
}

impl ShellPty {
    /// Allocate a PTY and start the shell on it.
    ///
    /// The shell becomes a session leader, so its pid doubles as the id of
    /// the process group used on teardown. The secondary descriptor is
    /// closed in this process once the shell holds it.
    pub fn spawn(config: &ShellConfig, cwd: &Path, env: &HashMap<String, String>) -> Result<Self> {
        let pair = native_pty_system()
            .openpty(config.size.into())
            .map_err(|e| ShellBridgeError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.program);
        cmd.args(&config.args);
        cmd.cwd(cwd);
        cmd.env_clear();
        for (key, value) in config.shell_env(env) {
            cmd.env(key, value);
        }

        // On failure `pair` drops here and both descriptors are released.
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ShellBridgeError::Spawn(format!("{}: {}", config.program, e)))?;
        drop(pair.slave);

        let pid = child.process_id();
        info!(program = %config.program, pid = ?pid, "shell spawned");

        let mut shell = Self {
            master: Some(pair.master),
            writer: None,
            child: Some(child),
            #[cfg(unix)]
            group: pid.and_then(ProcessGroup::from_leader),
            pid,
        };

        // From here on an error drops `shell`, which kills the group.
        let writer = shell
            .master()?
            .take_writer()
            .map_err(|e| ShellBridgeError::Pty(e.to_string()))?;
        shell.writer = Some(Arc::new(Mutex::new(writer)));

        Ok(shell)
    }

    /// Type the setup lines into the shell, pausing so each is consumed
    /// before the next arrives.
    pub async fn initialize(&mut self, config: &ShellConfig) -> Result<()> {
        tokio::time::sleep(config.settle_delay).await;
        for line in config.setup_lines() {
            self.write(format!("{line}\n").as_bytes()).await?;
            tokio::time::sleep(config.line_delay).await;
        }
        Ok(())
    }

    /// Process id of the shell, if it is still attached.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and(self.pid)
    }

    /// Whether the PTY is still open.
    pub fn is_open(&self) -> bool {
        self.master.is_some()
    }

    /// A new reader over the master side, owning its own descriptor.
    ///
    /// On unix the reader polls with a timeout so that a stopped reader
    /// thread exits even while a background job keeps the secondary side
    /// open.
    pub fn take_reader(&self) -> Result<Box<dyn Read + Send>> {
        let master = self.master()?;

        #[cfg(unix)]
        {
            if let Some(fd) = master.as_raw_fd() {
                return Ok(Box::new(PollingReader::duplicate(fd, READ_POLL_INTERVAL)?));
            }
        }

        master
            .try_clone_reader()
            .map_err(|e| ShellBridgeError::Pty(e.to_string()))
    }

    /// Update the window size. Best effort: no-op when closed, and a failed
    /// resize is only logged.
    pub fn resize(&self, size: PtySize) {
        if let Some(master) = &self.master {
            match master.resize(size.into()) {
                Ok(()) => debug!(rows = size.rows, cols = size.cols, "PTY resized"),
                Err(e) => debug!("PTY resize failed: {}", e),
            }
        }
    }

    /// Write raw bytes to the shell.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .clone()
            .ok_or(ShellBridgeError::NotInteractive)?;
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut writer = writer
                .lock()
                .map_err(|_| std::io::Error::other("PTY writer lock poisoned"))?;
            writer.write_all(&data)?;
            writer.flush()
        })
        .await
        .map_err(|e| ShellBridgeError::Pty(e.to_string()))??;

        Ok(())
    }

    /// Terminate the shell and release the PTY.
    ///
    /// SIGTERM goes to the whole process group; if the shell is still
    /// alive after `terminate_timeout` the group gets SIGKILL and the shell
    /// is reaped. Calling this again is a no-op.
    pub async fn close(&mut self, terminate_timeout: Duration) {
        if let Some(mut child) = self.child.take() {
            self.signal(&mut child, Signal::Terminate);

            if !wait_for_exit(&mut child, terminate_timeout).await {
                debug!(pid = ?self.pid, "shell ignored SIGTERM, killing group");
                self.signal(&mut child, Signal::Kill);
                let reaped = tokio::task::spawn_blocking(move || child.wait()).await;
                if let Ok(Err(e)) = reaped {
                    debug!("reaping shell failed: {}", e);
                }
            }
            info!(pid = ?self.pid, "shell terminated");
        }

        #[cfg(unix)]
        {
            self.group = None;
        }
        self.writer = None;
        self.master = None;
    }

    fn master(&self) -> Result<&(dyn MasterPty + Send)> {
        self.master
            .as_deref()
            .ok_or_else(|| ShellBridgeError::Pty("PTY already closed".into()))
    }

    #[cfg(unix)]
    fn signal(&self, child: &mut Box<dyn Child + Send + Sync>, signal: Signal) {
        let result = match self.group {
            Some(group) => group.signal(signal),
            None => child.kill(),
        };
        if let Err(e) = result {
            warn!(?signal, "failed to signal shell: {}", e);
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, child: &mut Box<dyn Child + Send + Sync>, signal: Signal) {
        if let Err(e) = child.kill() {
            warn!(?signal, "failed to signal shell: {}", e);
        }
    }
}

impl Drop for ShellPty {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!(pid = ?self.pid, "shell dropped without close, killing");
            self.signal(&mut child, Signal::Kill);

            // Reap on a blocking thread when a runtime is available.
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn_blocking(move || {
                        if let Err(e) = child.wait() {
                            debug!("reaping dropped shell failed: {}", e);
                        }
                    });
                }
                Err(_) => match child.try_wait() {
                    Ok(Some(status)) => debug!(?status, "dropped shell reaped"),
                    Ok(None) => debug!("dropped shell not yet reaped"),
                    Err(e) => debug!("reaping dropped shell failed: {}", e),
                },
            }
        }
    }
}

/// Poll until the child exits or `timeout` passes. A child whose status
/// can no longer be queried counts as exited.
async fn wait_for_exit(child: &mut Box<dyn Child + Send + Sync>, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) | Err(_) => return true,
            Ok(None) => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}
