//! Background task that turns PTY output into `shell_output` messages.

use std::io::Read;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::{FlushPolicy, OutputBuffer, Utf8Decoder};
use crate::protocol::ServerMessage;
use crate::pty::{spawn_reader, ReaderHandle};
use crate::Result;

/// Why the pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The PTY reached end of stream: the shell is gone.
    EndOfStream,
    /// [`OutputPump::stop`] was called.
    Cancelled,
    /// The outbound channel was closed by the connection.
    SinkClosed,
}

/// Handle to a running output pump.
pub struct OutputPump {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<PumpExit>>,
    reader: ReaderHandle,
}

impl OutputPump {
    /// Start draining `reader` into `sink`.
    pub fn spawn<R>(reader: R, policy: FlushPolicy, sink: mpsc::Sender<ServerMessage>) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (chunks, reader) = spawn_reader(reader, policy.read_chunk)?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(chunks, policy, sink, shutdown_rx));

        Ok(Self {
            shutdown,
            handle: Some(handle),
            reader,
        })
    }

    /// Whether the pump task has not yet been joined.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Wait for the pump to stop on its own. Pending forever once joined.
    ///
    /// Cancel-safe: dropping this future leaves the pump joinable.
    pub async fn finished(&mut self) -> PumpExit {
        let Some(handle) = self.handle.as_mut() else {
            return std::future::pending().await;
        };
        let exit = handle.await.unwrap_or(PumpExit::Cancelled);
        self.handle = None;
        self.reader.cancel();
        exit
    }

    /// Ask the pump to stop and wait for it, including its final flush,
    /// then join the reader thread. Returns `None` if the pump was already
    /// joined.
    pub async fn stop(&mut self) -> Option<PumpExit> {
        let _ = self.shutdown.send(true);
        let exit = match self.handle.take() {
            Some(handle) => Some(handle.await.unwrap_or(PumpExit::Cancelled)),
            None => None,
        };
        self.reader.stop().await;
        exit
    }
}

async fn run(
    mut chunks: mpsc::Receiver<Vec<u8>>,
    policy: FlushPolicy,
    sink: mpsc::Sender<ServerMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> PumpExit {
    let mut decoder = Utf8Decoder::new();
    let mut buffer = OutputBuffer::new(policy, Instant::now());
    let mut tick = tokio::time::interval(policy.tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        let flushed = tokio::select! {
            biased;
            _ = shutdown.changed() => break PumpExit::Cancelled,
            chunk = chunks.recv() => match chunk {
                Some(bytes) => {
                    let text = decoder.decode(&bytes);
                    buffer.push(&text, Instant::now())
                }
                None => break PumpExit::EndOfStream,
            },
            _ = tick.tick() => buffer.poll_idle(Instant::now()),
        };

        if let Some(output) = flushed {
            trace!(len = output.len(), "flushing shell output");
            if sink.send(ServerMessage::shell_output(output)).await.is_err() {
                break PumpExit::SinkClosed;
            }
        }
    };

    let mut rest = buffer.finish().unwrap_or_default();
    rest.push_str(&decoder.finish());
    if !rest.trim().is_empty() {
        // Best effort: the connection may already be gone.
        let _ = sink.send(ServerMessage::shell_output(rest)).await;
    }

    debug!(?exit, "output pump stopped");
    exit
}
