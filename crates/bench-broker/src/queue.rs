//! Async, bounded, drop-oldest telemetry queue.
//!
//! Producers push synchronously (the serial worker runs on a plain thread);
//! consumers await [`TelemetryQueue::recv`].  When the queue is full the oldest
//! frame is evicted, counted and logged at debug level.  Eviction is not an
//! error for the producer.

use std::sync::{Mutex, MutexGuard, PoisonError};

use bench_core::{BoundedQueue, Frame};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug)]
struct Inner {
    frames: BoundedQueue<Frame>,
    closed: bool,
    evicted: u64,
}

/// A shared telemetry backlog.  Wrap it in an `Arc` to share it between the
/// producer and any number of competing consumers.
#[derive(Debug)]
pub struct TelemetryQueue {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl TelemetryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: BoundedQueue::new(capacity),
                closed: false,
                evicted: 0,
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `frame`, returning the evicted oldest frame if the queue was full.
    ///
    /// Frames pushed after [`close`](Self::close) are ignored.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let evicted = {
            let mut inner = self.lock();
            if inner.closed {
                return None;
            }
            let evicted = inner.frames.push(frame);
            if evicted.is_some() {
                inner.evicted += 1;
            }
            evicted
        };
        if let Some(old) = evicted {
            debug!(dropped = %old, "telemetry backlog full; dropped oldest frame");
        }
        self.changed.notify_waiters();
        evicted
    }

    /// Waits for the next frame.  Returns `None` once the queue is closed and
    /// drained.
    pub async fn recv(&self) -> Option<Frame> {
        loop {
            // Register interest before checking, so a push between the check
            // and the await is not missed.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(frame) = inner.frames.pop() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Takes the next frame without waiting.
    pub fn try_recv(&self) -> Option<Frame> {
        self.lock().frames.pop()
    }

    /// Discards the backlog and returns how many frames were dropped.
    pub fn purge(&self) -> usize {
        self.lock().frames.purge()
    }

    /// Stops the queue: pending frames can still be drained, then `recv`
    /// returns `None`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().frames.capacity()
    }

    /// Total frames evicted by overflow since creation.
    pub fn evicted_count(&self) -> u64 {
        self.lock().evicted
    }

    /// The queued frames, oldest first, without consuming them.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.lock().frames.iter().copied().collect()
    }
}
