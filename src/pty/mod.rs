//! PTY (pseudo-terminal) shell management.
//!
//! [`ShellPty`] owns one PTY pair and the shell spawned on its secondary
//! side. The shell leads its own process group so teardown can signal the
//! shell together with everything it forked.

mod process_group;
mod reader;
mod shell;

#[cfg(unix)]
pub use process_group::ProcessGroup;
pub use process_group::Signal;
#[cfg(unix)]
pub use reader::PollingReader;
pub use reader::{spawn_reader, ReaderHandle};
pub use shell::{ShellConfig, ShellPty};

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl From<PtySize> for portable_pty::PtySize {
    fn from(size: PtySize) -> Self {
        portable_pty::PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_size_default() {
        let size = PtySize::default();
        assert_eq!(size.rows, 24);
        assert_eq!(size.cols, 80);
    }

    #[test]
    fn test_native_size_conversion() {
        let native: portable_pty::PtySize = PtySize::new(40, 120).into();
        assert_eq!(native.rows, 40);
        assert_eq!(native.cols, 120);
        assert_eq!(native.pixel_width, 0);
        assert_eq!(native.pixel_height, 0);
    }
}
