//! In-process broker.
//!
//! Implements every channel trait over shared memory, with the same delivery
//! semantics the bridges rely on from a real bus:
//!
//! - the command channel is unbounded and survives sessions: a command taken
//!   by a consumer that disconnects before acknowledging it is put back at the
//!   head of the channel;
//! - the telemetry channel is bounded and drop-oldest, purged on subscribe.
//!
//! Outages can be simulated with [`MemoryBroker::disconnect_all`] (drops every
//! live session) and [`MemoryBroker::set_unreachable_for`] (refuses new
//! sessions for a while).  The clock is `tokio::time`, so paused-time tests
//! can step through retry intervals.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bench_core::Frame;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::channel::{
    Broker, CommandConsumer, CommandPublisher, Delivery, DeliveryTag, TelemetryPublisher,
    TelemetrySource, TelemetrySubscription,
};
use crate::config::DEFAULT_TELEMETRY_CAPACITY;
use crate::error::BrokerError;
use crate::queue::TelemetryQueue;

const ENDPOINT: &str = "memory";

#[derive(Debug, Default)]
struct State {
    /// Commands waiting for a consumer, oldest first.
    pending: VecDeque<(DeliveryTag, Vec<u8>)>,
    /// Delivered but unacknowledged commands, keyed by tag, with their consumer.
    in_flight: BTreeMap<DeliveryTag, (u64, Vec<u8>)>,
    acked: Vec<Vec<u8>>,
    next_tag: DeliveryTag,
    next_session: u64,
    /// Bumped by `disconnect_all`; sessions from an older generation are dead.
    generation: u64,
    unreachable_until: Option<Instant>,
    connect_attempts: u32,
    failed_attempts: u32,
}

impl State {
    /// Puts `session`'s unacknowledged commands back at the head, in order.
    fn requeue(&mut self, session: Option<u64>) {
        let tags: Vec<DeliveryTag> = self
            .in_flight
            .iter()
            .filter(|(_, (owner, _))| session.map_or(true, |id| *owner == id))
            .map(|(tag, _)| *tag)
            .collect();
        for tag in tags.into_iter().rev() {
            if let Some((_, payload)) = self.in_flight.remove(&tag) {
                self.pending.push_front((tag, payload));
            }
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    changed: Notify,
    telemetry: Arc<TelemetryQueue>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-process message bus.  Clones share the same channels.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_TELEMETRY_CAPACITY)
    }
}

impl MemoryBroker {
    /// Creates a broker whose telemetry channel holds `telemetry_capacity` frames.
    pub fn new(telemetry_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                changed: Notify::new(),
                telemetry: Arc::new(TelemetryQueue::new(telemetry_capacity)),
            }),
        }
    }

    /// Refuses new sessions until `duration` has elapsed.
    pub fn set_unreachable_for(&self, duration: Duration) {
        self.shared.lock().unreachable_until = Some(Instant::now() + duration);
    }

    /// Drops every live session.  Their unacknowledged commands are requeued.
    pub fn disconnect_all(&self) {
        {
            let mut state = self.shared.lock();
            state.generation += 1;
            state.requeue(None);
        }
        info!("memory broker: all sessions disconnected");
        self.shared.changed.notify_waiters();
    }

    /// Number of session attempts (successful or not).
    pub fn connect_attempts(&self) -> u32 {
        self.shared.lock().connect_attempts
    }

    /// Number of refused session attempts.
    pub fn failed_attempts(&self) -> u32 {
        self.shared.lock().failed_attempts
    }

    /// Commands waiting for a consumer.
    pub fn pending_commands(&self) -> Vec<Vec<u8>> {
        self.shared.lock().pending.iter().map(|(_, p)| p.clone()).collect()
    }

    /// Commands delivered but not yet acknowledged.
    pub fn in_flight_commands(&self) -> usize {
        self.shared.lock().in_flight.len()
    }

    /// Payloads acknowledged so far, in acknowledgement order.
    pub fn acked_commands(&self) -> Vec<Vec<u8>> {
        self.shared.lock().acked.clone()
    }

    /// Enqueues a raw payload, bypassing frame validation.
    pub fn publish_raw(&self, payload: Vec<u8>) {
        {
            let mut state = self.shared.lock();
            let tag = state.next_tag;
            state.next_tag += 1;
            state.pending.push_back((tag, payload));
        }
        self.shared.changed.notify_waiters();
    }

    /// The telemetry channel backlog, oldest first.
    pub fn telemetry_backlog(&self) -> Vec<Frame> {
        self.shared.telemetry.snapshot()
    }

    /// Direct handle to the telemetry channel.
    pub fn telemetry_queue(&self) -> Arc<TelemetryQueue> {
        Arc::clone(&self.shared.telemetry)
    }

    /// Registers a session attempt; returns `(session id, generation)`.
    fn open_session(&self) -> Result<(u64, u64), BrokerError> {
        let mut state = self.shared.lock();
        state.connect_attempts += 1;
        if let Some(until) = state.unreachable_until {
            if Instant::now() < until {
                state.failed_attempts += 1;
                return Err(BrokerError::Unavailable {
                    endpoint: ENDPOINT.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            state.unreachable_until = None;
        }
        let id = state.next_session;
        state.next_session += 1;
        Ok((id, state.generation))
    }

    fn check_reachable(&self) -> Result<(), BrokerError> {
        match self.shared.lock().unreachable_until {
            Some(until) if Instant::now() < until => Err(BrokerError::Unavailable {
                endpoint: ENDPOINT.to_string(),
                reason: "connection refused".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect_consumer(&self) -> Result<Box<dyn CommandConsumer>, BrokerError> {
        let (id, generation) = self.open_session()?;
        debug!(session = id, "memory broker: command consumer attached");
        Ok(Box::new(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            id,
            generation,
        }))
    }

    async fn connect_publisher(&self) -> Result<Box<dyn TelemetryPublisher>, BrokerError> {
        let (id, generation) = self.open_session()?;
        debug!(session = id, "memory broker: telemetry publisher attached");
        Ok(Box::new(MemoryPublisher {
            shared: Arc::clone(&self.shared),
            generation,
        }))
    }

    fn endpoint(&self) -> String {
        ENDPOINT.to_string()
    }
}

#[async_trait]
impl CommandPublisher for MemoryBroker {
    async fn publish_command(&self, frame: Frame) -> Result<(), BrokerError> {
        self.check_reachable()?;
        self.publish_raw(frame.into());
        Ok(())
    }
}

#[async_trait]
impl TelemetrySource for MemoryBroker {
    async fn subscribe_telemetry(&self) -> Result<TelemetrySubscription, BrokerError> {
        self.check_reachable()?;
        let (subscription, purged) = TelemetrySubscription::attach(self.telemetry_queue());
        debug!(purged, "memory broker: telemetry subscriber attached");
        Ok(subscription)
    }
}

// ── Sessions ──────────────────────────────────────────────────────────────────

struct MemoryConsumer {
    shared: Arc<Shared>,
    id: u64,
    generation: u64,
}

impl MemoryConsumer {
    fn lost() -> BrokerError {
        BrokerError::ConnectionLost("memory broker session dropped".to_string())
    }
}

#[async_trait]
impl CommandConsumer for MemoryConsumer {
    async fn next_command(&mut self) -> Result<Delivery, BrokerError> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if state.generation != self.generation {
                    return Err(Self::lost());
                }
                if let Some((tag, payload)) = state.pending.pop_front() {
                    state.in_flight.insert(tag, (self.id, payload.clone()));
                    return Ok(Delivery { payload, tag });
                }
            }

            notified.await;
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let mut state = self.shared.lock();
        if state.generation != self.generation {
            return Err(Self::lost());
        }
        match state.in_flight.get(&tag) {
            Some((owner, _)) if *owner == self.id => {
                if let Some((_, payload)) = state.in_flight.remove(&tag) {
                    state.acked.push(payload);
                }
                Ok(())
            }
            _ => Err(BrokerError::ConnectionLost(format!("unknown delivery tag {tag}"))),
        }
    }

    async fn close(&mut self) {
        self.shared.lock().requeue(Some(self.id));
        self.shared.changed.notify_waiters();
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.shared.lock().requeue(Some(self.id));
        self.shared.changed.notify_waiters();
    }
}

struct MemoryPublisher {
    shared: Arc<Shared>,
    generation: u64,
}

#[async_trait]
impl TelemetryPublisher for MemoryPublisher {
    async fn publish(&mut self, frame: Frame) -> Result<(), BrokerError> {
        if self.shared.lock().generation != self.generation {
            return Err(BrokerError::ConnectionLost(
                "memory broker session dropped".to_string(),
            ));
        }
        self.shared.telemetry.push(frame);
        Ok(())
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(opcode: u8) -> Frame {
        Frame::command(opcode, 0x0001)
    }

    #[tokio::test]
    async fn test_commands_are_consumed_in_publish_order() {
        // Arrange
        let broker = MemoryBroker::default();
        broker.publish_command(cmd(0x08)).await.unwrap();
        broker.publish_command(cmd(0x0B)).await.unwrap();
        let mut consumer = broker.connect_consumer().await.unwrap();

        // Act
        let first = consumer.next_command().await.unwrap();
        let second = consumer.next_command().await.unwrap();

        // Assert
        assert_eq!(first.frame().unwrap(), cmd(0x08));
        assert_eq!(second.frame().unwrap(), cmd(0x0B));
        assert_eq!(broker.in_flight_commands(), 2);
    }

    #[tokio::test]
    async fn test_unacked_command_is_redelivered_after_disconnect() {
        // Arrange: take a command without acknowledging it
        let broker = MemoryBroker::default();
        broker.publish_command(cmd(0x02)).await.unwrap();
        broker.publish_command(cmd(0x03)).await.unwrap();
        let mut consumer = broker.connect_consumer().await.unwrap();
        let first = consumer.next_command().await.unwrap();

        // Act
        broker.disconnect_all();
        let stale = consumer.ack(first.tag).await;
        let mut fresh = broker.connect_consumer().await.unwrap();
        let redelivered = fresh.next_command().await.unwrap();

        // Assert
        assert!(matches!(stale, Err(BrokerError::ConnectionLost(_))));
        assert_eq!(redelivered.frame().unwrap(), cmd(0x02));
        assert_eq!(broker.pending_commands(), vec![Vec::from(cmd(0x03))]);
    }

    #[tokio::test]
    async fn test_acked_command_is_not_redelivered() {
        let broker = MemoryBroker::default();
        broker.publish_command(cmd(0x10)).await.unwrap();
        let mut consumer = broker.connect_consumer().await.unwrap();
        let delivery = consumer.next_command().await.unwrap();

        consumer.ack(delivery.tag).await.unwrap();
        drop(consumer);

        assert!(broker.pending_commands().is_empty());
        assert_eq!(broker.acked_commands(), vec![Vec::from(cmd(0x10))]);
    }

    #[tokio::test]
    async fn test_waiting_consumer_sees_disconnect() {
        let broker = MemoryBroker::default();
        let mut consumer = broker.connect_consumer().await.unwrap();

        let waiter = tokio::spawn(async move { consumer.next_command().await });
        tokio::task::yield_now().await;
        broker.disconnect_all();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(BrokerError::ConnectionLost(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_window_refuses_sessions() {
        // Arrange
        let broker = MemoryBroker::default();
        broker.set_unreachable_for(Duration::from_secs(12));

        // Act / Assert
        assert!(broker.connect_consumer().await.is_err());
        tokio::time::advance(Duration::from_secs(12)).await;
        assert!(broker.connect_consumer().await.is_ok());
        assert_eq!(broker.connect_attempts(), 2);
        assert_eq!(broker.failed_attempts(), 1);
    }

    #[tokio::test]
    async fn test_telemetry_publish_then_subscribe_sees_only_new_frames() {
        // Arrange
        let broker = MemoryBroker::new(50);
        let mut publisher = broker.connect_publisher().await.unwrap();
        publisher.publish(Frame::command(0x0B, 0x0019)).await.unwrap();

        // Act
        let mut subscription = broker.subscribe_telemetry().await.unwrap();
        publisher.publish(Frame::command(0x0B, 0x001A)).await.unwrap();

        // Assert
        assert_eq!(subscription.recv().await, Some(Frame::command(0x0B, 0x001A)));
    }
}
