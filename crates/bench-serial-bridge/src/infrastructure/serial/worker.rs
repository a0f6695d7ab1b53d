//! The serial worker: single owner of the serial port.
//!
//! Both bridge directions need the port: the command bridge writes frames and
//! discards the receive buffer after a close command, the telemetry side reads.
//! Letting them touch the port concurrently would allow a discard to land
//! between an availability check and a read, or in the middle of a read.
//! Instead one dedicated thread owns the port and does everything in turn:
//!
//! ```text
//! loop {
//!     service queued requests (write, or write then discard input), in order
//!     read for at most the read timeout
//!     cut complete 4-byte frames off the receive buffer → telemetry queue
//! }
//! ```
//!
//! Requests come from [`SerialHandle`]s over a channel and are answered through
//! a oneshot, so `write_frame` returns only once the bytes were written.
//! Partial frames stay buffered until the rest arrives.  A close frame is
//! written and the input discarded within one request, so no read can slip in
//! between them.  The discard clears both the port's input buffer and any
//! partial frame already read.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use bench_broker::TelemetryQueue;
use bench_core::{decode_frame, Frame, FRAME_LEN};
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

use super::{SerialError, Transport};
use crate::application::FrameWriter;

/// Bytes requested per read call.
const READ_CHUNK: usize = 64;

enum Request {
    /// Answers with the number of bytes discarded (0 unless `discard_input`).
    Write {
        frame: Frame,
        discard_input: bool,
        reply: oneshot::Sender<Result<usize, SerialError>>,
    },
    Shutdown,
}

/// Accumulates received bytes and cuts them into frames.
#[derive(Debug, Default)]
struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete frame, or `None` while fewer than 4 bytes are buffered.
    fn next_frame(&mut self) -> Option<Frame> {
        let (frame, used) = decode_frame(&self.buffer).ok()?;
        self.buffer.drain(..used);
        Some(frame)
    }

    /// Drops any partial frame; returns how many bytes were dropped.
    fn clear(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }
}

/// Cloneable handle for sending requests to the worker thread.
#[derive(Debug, Clone)]
pub struct SerialHandle {
    requests: mpsc::UnboundedSender<Request>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Write {
                frame,
                discard_input,
                ..
            } => write!(f, "Write({frame}, discard_input: {discard_input})"),
            Request::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl SerialHandle {
    async fn write(&self, frame: Frame, discard_input: bool) -> Result<usize, SerialError> {
        let (reply, done) = oneshot::channel();
        self.requests
            .send(Request::Write {
                frame,
                discard_input,
                reply,
            })
            .map_err(|_| SerialError::WorkerStopped)?;
        done.await.map_err(|_| SerialError::WorkerStopped)?
    }
}

#[async_trait]
impl FrameWriter for SerialHandle {
    async fn write_frame(&self, frame: Frame) -> Result<(), SerialError> {
        self.write(frame, false).await.map(|_| ())
    }

    async fn write_and_discard(&self, frame: Frame) -> Result<usize, SerialError> {
        self.write(frame, true).await
    }
}

/// The running worker thread.
#[derive(Debug)]
pub struct SerialWorker {
    handle: SerialHandle,
    thread: JoinHandle<Result<(), SerialError>>,
}

impl SerialWorker {
    /// Moves `transport` onto a new thread and starts the read loop.
    /// Decoded frames are pushed into `telemetry`.
    ///
    /// # Errors
    ///
    /// Returns [`SerialError::Io`] if the thread cannot be spawned.
    pub fn spawn<T>(transport: T, telemetry: Arc<TelemetryQueue>) -> Result<Self, SerialError>
    where
        T: Transport + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let thread = thread::Builder::new()
            .name("serial-worker".to_string())
            .spawn(move || run(transport, rx, telemetry))?;
        Ok(Self {
            handle: SerialHandle { requests: tx },
            thread,
        })
    }

    pub fn handle(&self) -> SerialHandle {
        self.handle.clone()
    }

    /// Stops the worker and waits for it to release the port.  Blocks for up
    /// to one read timeout.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the worker, if it stopped on its own.
    pub fn shutdown(self) -> Result<(), SerialError> {
        let _ = self.handle.requests.send(Request::Shutdown);
        self.thread.join().map_err(|_| SerialError::WorkerStopped)?
    }
}

fn run<T: Transport>(
    mut transport: T,
    mut requests: mpsc::UnboundedReceiver<Request>,
    telemetry: Arc<TelemetryQueue>,
) -> Result<(), SerialError> {
    let result = serve(&mut transport, &mut requests, &telemetry);
    // Wakes the telemetry bridge if the port failed under it.
    telemetry.close();
    match &result {
        Ok(()) => info!("serial worker stopped; port released"),
        Err(e) => error!(error = %e, "serial worker failed"),
    }
    result
}

fn serve<T: Transport>(
    transport: &mut T,
    requests: &mut mpsc::UnboundedReceiver<Request>,
    telemetry: &TelemetryQueue,
) -> Result<(), SerialError> {
    let mut assembler = FrameAssembler::default();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        loop {
            match requests.try_recv() {
                Ok(Request::Write {
                    frame,
                    discard_input,
                    reply,
                }) => {
                    let result = write(transport, &mut assembler, frame, discard_input);
                    let failed = result.clone().err();
                    let _ = reply.send(result);
                    if let Some(e) = failed {
                        return Err(e);
                    }
                }
                Ok(Request::Shutdown) | Err(TryRecvError::Disconnected) => return Ok(()),
                Err(TryRecvError::Empty) => break,
            }
        }

        let n = transport.read(&mut chunk)?;
        if n == 0 {
            continue;
        }
        assembler.extend(&chunk[..n]);
        while let Some(frame) = assembler.next_frame() {
            debug!(%frame, "telemetry frame received");
            telemetry.push(frame);
        }
        if !assembler.buffer.is_empty() {
            debug!(
                buffered = assembler.buffer.len(),
                needed = FRAME_LEN,
                "partial frame kept for next read"
            );
        }
    }
}

/// Writes one frame and, if asked, discards all input received so far.
/// Returns the number of bytes discarded.
fn write<T: Transport>(
    transport: &mut T,
    assembler: &mut FrameAssembler,
    frame: Frame,
    discard_input: bool,
) -> Result<usize, SerialError> {
    transport.write_all(frame.as_bytes())?;
    transport.flush()?;
    if !discard_input {
        return Ok(0);
    }

    let unread = match transport.available() {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "could not count unread input before discarding it");
            0
        }
    };
    let dropped = unread + assembler.clear();
    transport.clear_input()?;
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::infrastructure::serial::MockTransport;

    /// Polls `condition` until it holds or two seconds pass.
    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_assembler_keeps_partial_frame_until_complete() {
        // Arrange
        let mut assembler = FrameAssembler::default();

        // Act
        assembler.extend(&[0x0B, 0x00]);
        let early = assembler.next_frame();
        assembler.extend(&[0x19, 0xFE, 0x0C]);
        let complete = assembler.next_frame();

        // Assert
        assert_eq!(early, None);
        assert_eq!(complete, Some(Frame::from_bytes([0x0B, 0x00, 0x19, 0xFE])));
        assert_eq!(assembler.buffer, vec![0x0C]);
    }

    #[test]
    fn test_worker_publishes_frames_split_across_reads() {
        // Arrange
        let mock = MockTransport::default();
        let telemetry = Arc::new(TelemetryQueue::new(50));
        let worker = SerialWorker::spawn(mock.clone(), Arc::clone(&telemetry)).unwrap();

        // Act: one frame arrives in two pieces, then a second whole frame
        mock.inject_read(&[0x08, 0x01]);
        thread::sleep(Duration::from_millis(20));
        mock.inject_read(&[0x02, 0xFE, 0x08, 0x03, 0x04, 0xFE]);

        // Assert
        assert!(wait_until(|| telemetry.len() == 2));
        assert_eq!(
            telemetry.snapshot(),
            vec![
                Frame::from_bytes([0x08, 0x01, 0x02, 0xFE]),
                Frame::from_bytes([0x08, 0x03, 0x04, 0xFE]),
            ]
        );
        worker.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_close_write_discards_partial_frame_and_unread_input() {
        // Arrange: half a frame already read into the assembler
        let mock = MockTransport::default();
        let telemetry = Arc::new(TelemetryQueue::new(50));
        let worker = SerialWorker::spawn(mock.clone(), Arc::clone(&telemetry)).unwrap();
        let handle = worker.handle();
        mock.inject_read(&[0x08, 0x00]);
        let port_view = mock.clone();
        assert!(
            tokio::task::spawn_blocking(move || wait_until(|| port_view.unread() == 0))
                .await
                .unwrap()
        );

        // Act
        let dropped = handle
            .write_and_discard(Frame::command(0x07, 0x0000))
            .await
            .unwrap();
        mock.inject_read(&[0x05, 0x00, 0x04, 0xFE]);

        // Assert: the stale half never merges with what arrives afterwards
        assert_eq!(mock.written(), vec![0x07, 0x00, 0x00, 0xFE]);
        assert_eq!(mock.clear_count(), 1);
        assert!(dropped >= 2);
        let queue_view = Arc::clone(&telemetry);
        assert!(
            tokio::task::spawn_blocking(move || wait_until(|| queue_view.len() == 1))
                .await
                .unwrap()
        );
        assert_eq!(telemetry.snapshot(), vec![Frame::command(0x05, 0x0004)]);
        tokio::task::spawn_blocking(move || worker.shutdown())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_discard_still_clears_input_when_count_is_unavailable() {
        // Arrange
        let mock = MockTransport::default();
        let mut port = mock.clone();
        let mut assembler = FrameAssembler::default();
        assembler.extend(&[0x08]);
        mock.fail_available();

        // Act
        let dropped = write(&mut port, &mut assembler, Frame::command(0x01, 0), true).unwrap();

        // Assert: only the assembler's byte could be counted
        assert_eq!(dropped, 1);
        assert_eq!(mock.clear_count(), 1);
        assert!(assembler.buffer.is_empty());
    }

    #[test]
    fn test_plain_write_leaves_input_alone() {
        let mock = MockTransport::default();
        let mut port = mock.clone();
        let mut assembler = FrameAssembler::default();
        assembler.extend(&[0x08, 0x00]);

        let dropped = write(&mut port, &mut assembler, Frame::command(0x10, 1), false).unwrap();

        assert_eq!(dropped, 0);
        assert_eq!(mock.clear_count(), 0);
        assert_eq!(assembler.buffer, vec![0x08, 0x00]);
    }

    #[test]
    fn test_read_failure_stops_worker_and_closes_telemetry() {
        let mock = MockTransport::default();
        let telemetry = Arc::new(TelemetryQueue::new(50));
        let worker = SerialWorker::spawn(mock.clone(), Arc::clone(&telemetry)).unwrap();

        mock.fail_reads();

        assert!(wait_until(|| telemetry.is_closed()));
        assert!(matches!(worker.shutdown(), Err(SerialError::Io(_))));
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_report_worker_stopped() {
        let mock = MockTransport::default();
        let worker = SerialWorker::spawn(mock, Arc::new(TelemetryQueue::new(50))).unwrap();
        let handle = worker.handle();

        tokio::task::spawn_blocking(move || worker.shutdown())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            handle.write_frame(Frame::command(0x10, 1)).await,
            Err(SerialError::WorkerStopped)
        );
    }
}
