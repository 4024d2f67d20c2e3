//! Passive-mode execution context.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Working directory and environment snapshot for one session.
///
/// The directory only changes through a successful `cd`. While the session
/// is interactive the shell tracks its own directory and this one is left
/// alone.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Current working directory.
    cwd: PathBuf,
    /// Environment variables snapshot.
    env: HashMap<String, String>,
}

impl SessionContext {
    /// Create a context rooted at `cwd` with an empty environment.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            env: HashMap::new(),
        }
    }

    /// Capture the process's current directory and environment.
    /// Variables that are not valid UTF-8 are skipped.
    pub fn capture() -> std::io::Result<Self> {
        let mut ctx = Self::new(std::env::current_dir()?);
        ctx.env = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        Ok(ctx)
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Set the current working directory.
    pub fn set_cwd(&mut self, cwd: impl Into<PathBuf>) {
        self.cwd = cwd.into();
    }

    /// `HOME` from the snapshot, then the user's account home, then `/`.
    pub fn home_dir(&self) -> PathBuf {
        self.get_env("HOME")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    /// Get the environment variables.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Get a specific environment variable.
    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(|s| s.as_str())
    }

    /// Set an environment variable.
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }
}
