//! Channel traits: the seam between the bridges and a concrete message bus.
//!
//! The serial side uses [`Broker`] to open one session per direction (a
//! [`CommandConsumer`] and a [`TelemetryPublisher`]); the sessions are never
//! shared, and each is recreated on every reconnect.  The client side uses
//! [`CommandPublisher`] and [`TelemetrySource`].
//!
//! # Why traits? (for beginners)
//!
//! The bridge loops only need "give me the next command" and "publish this
//! frame".  Expressing that as traits lets tests drive the loops with the
//! in-process [`MemoryBroker`](crate::MemoryBroker) instead of a live MQTT
//! broker, including simulated outages.

use std::sync::Arc;

use async_trait::async_trait;
use bench_core::{Frame, FrameError};

use crate::error::BrokerError;
use crate::queue::TelemetryQueue;

/// Identifies one delivered command for acknowledgement.
pub type DeliveryTag = u64;

/// A command taken from the command channel but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The raw message payload.  Well-formed payloads are exactly one frame.
    pub payload: Vec<u8>,
    pub tag: DeliveryTag,
}

impl Delivery {
    /// Interprets the payload as a command frame.
    ///
    /// # Errors
    ///
    /// [`FrameError::WrongLength`] if the payload is not 4 bytes,
    /// [`FrameError::MissingTerminator`] if it does not end in `0xFE`.
    pub fn frame(&self) -> Result<Frame, FrameError> {
        let frame = Frame::try_from(self.payload.as_slice())?;
        frame.validate_command()?;
        Ok(frame)
    }
}

/// Consuming end of the command channel (serial side).
#[async_trait]
pub trait CommandConsumer: Send {
    /// Waits for the next command.  The command stays unacknowledged, and is
    /// redelivered to a later session if this one drops before [`ack`](Self::ack).
    async fn next_command(&mut self) -> Result<Delivery, BrokerError>;

    /// Confirms that the command identified by `tag` was applied.
    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Ends the session.  Unacknowledged commands are returned to the channel.
    async fn close(&mut self);
}

/// Producing end of the telemetry channel (serial side).
#[async_trait]
pub trait TelemetryPublisher: Send {
    async fn publish(&mut self, frame: Frame) -> Result<(), BrokerError>;

    async fn close(&mut self);
}

/// Opens serial-side sessions.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect_consumer(&self) -> Result<Box<dyn CommandConsumer>, BrokerError>;

    async fn connect_publisher(&self) -> Result<Box<dyn TelemetryPublisher>, BrokerError>;

    /// Human-readable broker location for logs.
    fn endpoint(&self) -> String;
}

/// Producing end of the command channel (client side).  Fire-and-forget.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish_command(&self, frame: Frame) -> Result<(), BrokerError>;
}

/// Consuming end of the telemetry channel (client side).
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Attaches a new subscriber.  The backlog queued before this call is
    /// purged, so the subscriber only receives frames published afterwards.
    async fn subscribe_telemetry(&self) -> Result<TelemetrySubscription, BrokerError>;
}

/// A live telemetry feed for one client.
///
/// Several subscriptions on the same source compete for frames: each frame
/// is delivered to exactly one of them.
#[derive(Debug)]
pub struct TelemetrySubscription {
    queue: Arc<TelemetryQueue>,
}

impl TelemetrySubscription {
    /// Purges `queue` and attaches to it.  Returns the subscription and the
    /// number of stale frames dropped.
    pub fn attach(queue: Arc<TelemetryQueue>) -> (Self, usize) {
        let purged = queue.purge();
        (Self { queue }, purged)
    }

    /// Next frame in publish order, or `None` when the source shut down.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.queue.recv().await
    }
}
