//! Process-group signaling for shell teardown.

/// Signals used while tearing down a shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the group to exit (SIGTERM).
    Terminate,
    /// Kill the group outright (SIGKILL).
    Kill,
}

/// Handle to a process group led by a spawned shell.
///
/// A group that no longer exists is treated as already signaled.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pgid: libc::pid_t,
}

#[cfg(unix)]
impl ProcessGroup {
    /// Handle for the group whose leader has the given pid.
    ///
    /// Returns `None` for pids that cannot name a process group (0, or
    /// values outside `pid_t`), since `killpg` would misinterpret them.
    pub fn from_leader(pid: u32) -> Option<Self> {
        libc::pid_t::try_from(pid)
            .ok()
            .filter(|pgid| *pgid > 1)
            .map(|pgid| Self { pgid })
    }

    /// Deliver `signal` to every process in the group.
    pub fn signal(&self, signal: Signal) -> std::io::Result<()> {
        let sig = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };

        // SAFETY: killpg has no memory-safety preconditions.
        let rc = unsafe { libc::killpg(self.pgid, sig) };
        if rc == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            tracing::trace!(pgid = self.pgid, "process group already gone");
            Ok(())
        } else {
            Err(err)
        }
    }
}
