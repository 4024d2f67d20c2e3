//! PTY output reader on a dedicated thread, bridged onto a tokio channel.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Chunks buffered between the reader thread and the pump.
const CHANNEL_CAPACITY: usize = 64;

/// Upper bound on waiting for the thread in [`ReaderHandle::stop`]. A
/// reader that blocks without ever timing out is detached after this.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle to a running reader thread.
///
/// Dropping the handle asks the thread to stop without waiting for it.
#[derive(Debug)]
pub struct ReaderHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Whether the thread has exited (or was already joined).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Ask the thread to stop without waiting for it.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Ask the thread to stop and wait for it to exit, dropping the reader
    /// and any descriptor it owns. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.cancel();
        let Some(thread) = self.thread.take() else {
            return;
        };

        let joined = tokio::time::timeout(
            JOIN_TIMEOUT,
            tokio::task::spawn_blocking(move || thread.join()),
        )
        .await;
        match joined {
            Ok(Ok(Ok(()))) => trace!("PTY reader joined"),
            Ok(_) => warn!("PTY reader thread panicked"),
            Err(_) => warn!("PTY reader did not stop in time, detaching"),
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Drain `reader` on a dedicated thread, forwarding chunks of at most
/// `chunk_size` bytes.
///
/// The receiver yields `None` once the PTY reports end of stream: a zero
/// read, or `EIO` after the last holder of the secondary side closes it.
/// The thread also stops when the receiver is dropped, and when
/// [`ReaderHandle::stop`] is called while a read has timed out
/// (`TimedOut`/`WouldBlock`).
pub fn spawn_reader<R>(
    reader: R,
    chunk_size: usize,
) -> std::io::Result<(mpsc::Receiver<Vec<u8>>, ReaderHandle)>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let thread = std::thread::Builder::new()
        .name("pty-reader".into())
        .spawn(move || read_loop(reader, chunk_size.max(1), tx, thread_stop))?;

    Ok((
        rx,
        ReaderHandle {
            stop,
            thread: Some(thread),
        },
    ))
}

fn read_loop<R: Read>(
    mut reader: R,
    chunk_size: usize,
    tx: mpsc::Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; chunk_size];

    while !stop.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("PTY reader: EOF");
                break;
            }
            Ok(n) => {
                trace!("PTY reader: read {} bytes", n);
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    debug!("PTY reader: channel closed");
                    break;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::Interrupted
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                ) =>
            {
                continue
            }
            Err(e) => {
                #[cfg(unix)]
                if e.raw_os_error() == Some(libc::EIO) {
                    debug!("PTY reader: secondary side closed (EIO)");
                    break;
                }

                error!("PTY reader error: {}", e);
                break;
            }
        }
    }
}

/// Reader over its own duplicate of a PTY master descriptor.
///
/// Each read waits at most `timeout` for data and then fails with
/// `TimedOut`, so the reader thread can notice a stop request even while a
/// process outside the shell's group still holds the secondary side.
#[cfg(unix)]
#[derive(Debug)]
pub struct PollingReader {
    file: std::fs::File,
    timeout: Duration,
}

#[cfg(unix)]
impl PollingReader {
    /// Duplicate `fd`; the original stays owned by the caller.
    pub fn duplicate(fd: std::os::fd::RawFd, timeout: Duration) -> std::io::Result<Self> {
        // SAFETY: `fd` is open for the duration of this call and only
        // borrowed to create a new descriptor.
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        Ok(Self {
            file: std::fs::File::from(borrowed.try_clone_to_owned()?),
            timeout,
        })
    }
}

#[cfg(unix)]
impl Read for PollingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::os::fd::AsRawFd;

        let mut pollfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = self.timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `pollfd` is a valid one-element array for the call.
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout) };
        match rc {
            -1 => Err(std::io::Error::last_os_error()),
            0 => Err(std::io::ErrorKind::TimedOut.into()),
            _ => self.file.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that never has data and never ends.
    struct Silent;

    impl Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(10));
            Err(std::io::ErrorKind::TimedOut.into())
        }
    }

    #[tokio::test]
    async fn test_reader_respects_chunk_size() {
        let data = vec![b'x'; 2500];
        let (mut rx, mut handle) = spawn_reader(Cursor::new(data), 1024).unwrap();

        let mut sizes = Vec::new();
        while let Some(chunk) = rx.recv().await {
            sizes.push(chunk.len());
        }

        assert_eq!(sizes, vec![1024, 1024, 452]);
        handle.stop().await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_reader_empty_input_closes_channel() {
        let (mut rx, mut handle) = spawn_reader(Cursor::new(Vec::new()), 1024).unwrap();
        assert!(rx.recv().await.is_none());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_reader_stops_when_receiver_dropped() {
        let (rx, mut handle) = spawn_reader(Cursor::new(vec![b'y'; 1 << 20]), 16).unwrap();
        drop(rx);
        handle.stop().await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_stop_ends_idle_reader() {
        let (mut rx, mut handle) = spawn_reader(Silent, 64).unwrap();
        assert!(!handle.is_finished());

        handle.stop().await;
        assert!(handle.is_finished());
        assert!(rx.recv().await.is_none());

        // Second stop is a no-op.
        handle.stop().await;
    }

    #[cfg(unix)]
    #[test]
    fn test_polling_reader_times_out_then_reads() {
        use std::io::Write;
        use std::os::fd::AsRawFd;
        use std::os::unix::net::UnixStream;

        let (mut writer, reader) = UnixStream::pair().unwrap();
        let mut polling =
            PollingReader::duplicate(reader.as_raw_fd(), Duration::from_millis(20)).unwrap();
        drop(reader);

        let mut buf = [0u8; 8];
        let err = polling.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);

        writer.write_all(b"hi").unwrap();
        assert_eq!(polling.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");

        drop(writer);
        assert_eq!(polling.read(&mut buf).unwrap(), 0);
    }
}
