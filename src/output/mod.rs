//! Interactive output buffering.
//!
//! Raw PTY bytes are decoded, accumulated and flushed as discrete
//! `shell_output` messages:
//! - a newline, more than 50 pending characters, or 200ms since the last
//!   flush sends the buffer when data arrives;
//! - a quiet non-blank buffer older than 300ms is sent anyway;
//! - whitespace-only flushes are dropped.
//!
//! # Example
//!
//! ```
//! use shell_bridge::output::{FlushPolicy, OutputBuffer};
//! use tokio::time::Instant;
//!
//! let now = Instant::now();
//! let mut buffer = OutputBuffer::new(FlushPolicy::default(), now);
//! assert_eq!(buffer.push("user@host:~$ ", now), None);
//! assert_eq!(buffer.push("\n", now).as_deref(), Some("user@host:~$ \n"));
//! ```

mod buffer;
mod decoder;
mod pump;

pub use buffer::{FlushPolicy, OutputBuffer};
pub use decoder::Utf8Decoder;
pub use pump::{OutputPump, PumpExit};
