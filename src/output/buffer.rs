//! Accumulation buffer and flush rules for interactive output.

use std::time::Duration;

use tokio::time::Instant;

/// When buffered shell output is turned into a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Maximum bytes taken from the PTY per read.
    pub read_chunk: usize,
    /// A buffer longer than this many characters is flushed on arrival.
    pub max_pending_chars: usize,
    /// Age since the last flush after which arriving data flushes.
    pub flush_after: Duration,
    /// Age after which a quiet, non-blank buffer is flushed anyway.
    pub idle_flush_after: Duration,
    /// How often the pump checks for idle output.
    pub tick: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            read_chunk: 1024,
            max_pending_chars: 50,
            flush_after: Duration::from_millis(200),
            idle_flush_after: Duration::from_millis(300),
            tick: Duration::from_millis(20),
        }
    }
}

/// Text waiting to be sent, plus the time of the last flush.
///
/// Flushing a whitespace-only buffer sends nothing but still clears it and
/// restarts the flush clock.
#[derive(Debug)]
pub struct OutputBuffer {
    policy: FlushPolicy,
    pending: String,
    last_flush: Instant,
}

impl OutputBuffer {
    pub fn new(policy: FlushPolicy, now: Instant) -> Self {
        Self {
            policy,
            pending: String::new(),
            last_flush: now,
        }
    }

    /// Text currently held.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Append freshly read text and flush if a newline arrived, the buffer
    /// grew past `max_pending_chars`, or `flush_after` has elapsed.
    pub fn push(&mut self, text: &str, now: Instant) -> Option<String> {
        self.pending.push_str(text);

        let due = self.pending.contains('\n')
            || self.pending.chars().count() > self.policy.max_pending_chars
            || now.duration_since(self.last_flush) > self.policy.flush_after;

        if due {
            self.flush(now)
        } else {
            None
        }
    }

    /// Flush a non-blank buffer that has sat for longer than
    /// `idle_flush_after` with no new data.
    pub fn poll_idle(&mut self, now: Instant) -> Option<String> {
        if is_blank(&self.pending) {
            return None;
        }
        if now.duration_since(self.last_flush) > self.policy.idle_flush_after {
            self.flush(now)
        } else {
            None
        }
    }

    /// Drain the remainder, if it has any visible content.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        (!is_blank(&rest)).then_some(rest)
    }

    fn flush(&mut self, now: Instant) -> Option<String> {
        self.last_flush = now;
        self.finish()
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}
