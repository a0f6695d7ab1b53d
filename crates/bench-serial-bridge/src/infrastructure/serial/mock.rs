//! Mock transport for testing.
//!
//! Behaves like a serial port with a read timeout: `read` blocks until bytes
//! are injected or the timeout expires.  Clones share the same state, so a
//! test keeps one clone while the worker thread owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{SerialError, Transport};

#[derive(Debug, Default)]
struct Inner {
    read_buffer: VecDeque<u8>,
    written: Vec<u8>,
    clears: usize,
    fail_reads: bool,
    fail_available: bool,
}

/// In-memory stand-in for the instrument's serial line.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<(Mutex<Inner>, Condvar)>,
    read_timeout: Duration,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(5))
    }
}

impl MockTransport {
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            inner: Arc::new((Mutex::new(Inner::default()), Condvar::new())),
            read_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `data` available to the next reads, as if the device sent it.
    pub fn inject_read(&self, data: &[u8]) {
        self.lock().read_buffer.extend(data);
        self.inner.1.notify_all();
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// How many times the receive buffer was cleared.
    pub fn clear_count(&self) -> usize {
        self.lock().clears
    }

    /// Bytes injected but not yet read.
    pub fn unread(&self) -> usize {
        self.lock().read_buffer.len()
    }

    /// Makes `available` fail, as some drivers do for the input count.
    pub fn fail_available(&self) {
        self.lock().fail_available = true;
    }

    /// Makes every subsequent read fail, as if the device was unplugged.
    pub fn fail_reads(&self) {
        self.lock().fail_reads = true;
        self.inner.1.notify_all();
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, SerialError> {
        let (lock, ready) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut inner, _) = ready
            .wait_timeout_while(guard, self.read_timeout, |inner| {
                inner.read_buffer.is_empty() && !inner.fail_reads
            })
            .unwrap_or_else(PoisonError::into_inner);

        if inner.fail_reads {
            return Err(SerialError::Io("device disconnected".to_string()));
        }
        let count = inner.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError> {
        self.lock().written.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SerialError> {
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        let mut inner = self.lock();
        inner.read_buffer.clear();
        inner.clears += 1;
        Ok(())
    }

    fn available(&mut self) -> Result<usize, SerialError> {
        let inner = self.lock();
        if inner.fail_available {
            return Err(SerialError::Io("input count not supported".to_string()));
        }
        Ok(inner.read_buffer.len())
    }
}
