//! Serial transport abstraction.
//!
//! [`Transport`] is the byte-level seam: the real port ([`SerialPortTransport`])
//! and the test double ([`MockTransport`]) both implement it.  Only the
//! [`worker`] thread ever calls it.

use thiserror::Error;

mod mock;
mod port;
pub mod worker;

pub use mock::MockTransport;
pub use port::SerialPortTransport;
pub use worker::{SerialHandle, SerialWorker};

/// Serial failures.  All of them are fatal for the bridge process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerialError {
    /// The device could not be opened (absent, busy, or no permission).
    #[error("serial transport unavailable at {path}: {reason}")]
    TransportUnavailable { path: String, reason: String },

    /// A read, write, or buffer operation failed on an open port.
    #[error("serial I/O error: {0}")]
    Io(String),

    /// The worker thread that owns the port has stopped.
    #[error("serial worker stopped")]
    WorkerStopped,
}

impl From<std::io::Error> for SerialError {
    fn from(e: std::io::Error) -> Self {
        SerialError::Io(e.to_string())
    }
}

impl From<serialport::Error> for SerialError {
    fn from(e: serialport::Error) -> Self {
        SerialError::Io(e.to_string())
    }
}

/// Byte stream to the instrument.
pub trait Transport: Send {
    /// Reads up to `buffer.len()` bytes, blocking at most for the transport's
    /// read timeout.  Returns `Ok(0)` when nothing arrived in time.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, SerialError>;

    /// Writes all of `data`.
    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError>;

    /// Blocks until written bytes have left the output buffer.
    fn flush(&mut self) -> Result<(), SerialError>;

    /// Discards bytes received but not yet read.
    fn clear_input(&mut self) -> Result<(), SerialError>;

    /// Bytes waiting to be read.
    fn available(&mut self) -> Result<usize, SerialError> {
        Ok(0)
    }
}
