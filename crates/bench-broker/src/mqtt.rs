//! MQTT implementation of the channel traits, built on `rumqttc`.
//!
//! # Channel mapping
//!
//! | Channel   | Topic (default) | QoS           | Session                                   |
//! |-----------|-----------------|---------------|-------------------------------------------|
//! | command   | `to_serial`     | at-least-once | persistent on both ends, manual acks on the consumer |
//! | telemetry | `from_serial`   | at-most-once  | clean                                     |
//!
//! The serial bridge's command consumer uses a fixed client id and a persistent
//! session, so the broker keeps its subscription and queues commands while the
//! bridge is offline.  Acknowledgements are manual: a `PUBACK` is sent only
//! after the frame was written to the serial port, and an unacknowledged
//! command is redelivered when the session reconnects.
//!
//! MQTT has no notion of a bounded queue, so the drop-oldest telemetry bound is
//! enforced by a [`TelemetryQueue`] on each end: the serial bridge buffers
//! frames it could not publish yet, and [`MqttBrokerClient`] buffers received
//! frames until a client consumes them.
//!
//! A broker only keeps commands for a subscription it knows about.  The serial
//! bridge's persistent session is created the first time it connects, so a
//! new deployment must start the serial bridge (or otherwise create that
//! session) before commands published by the web bridge are retained.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bench_core::Frame;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{
    Broker, CommandConsumer, CommandPublisher, Delivery, DeliveryTag, TelemetryPublisher,
    TelemetrySource, TelemetrySubscription,
};
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::queue::TelemetryQueue;

/// Capacity of rumqttc's request channel.
const REQUEST_CAPACITY: usize = 64;

/// Longest [`MqttBrokerClient::shutdown`] waits for queued commands to go out.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn mqtt_options(config: &BrokerConfig, client_id: &str, clean_session: bool) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(clean_session);
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }
    options
}

/// Polls `eventloop` until the broker accepts the connection.
async fn wait_for_connack(
    eventloop: &mut EventLoop,
    endpoint: &str,
) -> Result<(), BrokerError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!(code = ?ack.code, session_present = ack.session_present, "MQTT CONNACK");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                return Err(BrokerError::Unavailable {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn lost(e: impl std::fmt::Display) -> BrokerError {
    BrokerError::ConnectionLost(e.to_string())
}

// ── Serial side ───────────────────────────────────────────────────────────────

/// Opens serial-side sessions against an MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttBroker {
    config: BrokerConfig,
}

impl MqttBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn connect_consumer(&self) -> Result<Box<dyn CommandConsumer>, BrokerError> {
        let client_id = format!("{}-serial-commands", self.config.client_id_prefix);
        let mut options = mqtt_options(&self.config, &client_id, false);
        options.set_manual_acks(true);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        wait_for_connack(&mut eventloop, &self.config.endpoint()).await?;
        client
            .subscribe(&self.config.command_topic, QoS::AtLeastOnce)
            .await
            .map_err(lost)?;

        let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
        let driver = tokio::spawn(drive_consumer(eventloop, tx));
        info!(topic = %self.config.command_topic, "subscribed to command channel");

        Ok(Box::new(MqttConsumer {
            client,
            deliveries: rx,
            unacked: Vec::new(),
            next_tag: 0,
            driver,
        }))
    }

    async fn connect_publisher(&self) -> Result<Box<dyn TelemetryPublisher>, BrokerError> {
        let client_id = format!("{}-serial-telemetry", self.config.client_id_prefix);
        let options = mqtt_options(&self.config, &client_id, true);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        wait_for_connack(&mut eventloop, &self.config.endpoint()).await?;
        let driver = tokio::spawn(drive_publisher(eventloop));

        Ok(Box::new(MqttPublisher {
            client,
            topic: self.config.telemetry_topic.clone(),
            driver,
        }))
    }

    fn endpoint(&self) -> String {
        self.config.endpoint()
    }
}

/// Forwards incoming publishes to the consumer until the connection drops.
async fn drive_consumer(
    mut eventloop: EventLoop,
    deliveries: mpsc::Sender<Result<Publish, BrokerError>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if deliveries.send(Ok(publish)).await.is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                let _ = deliveries.send(Err(lost(&e))).await;
                return;
            }
        }
    }
}

/// Keeps the publisher's connection serviced until it drops.
async fn drive_publisher(mut eventloop: EventLoop) -> ConnectionError {
    loop {
        if let Err(e) = eventloop.poll().await {
            return e;
        }
    }
}

struct MqttConsumer {
    client: AsyncClient,
    deliveries: mpsc::Receiver<Result<Publish, BrokerError>>,
    unacked: Vec<(DeliveryTag, Publish)>,
    next_tag: DeliveryTag,
    driver: JoinHandle<()>,
}

#[async_trait]
impl CommandConsumer for MqttConsumer {
    async fn next_command(&mut self) -> Result<Delivery, BrokerError> {
        match self.deliveries.recv().await {
            Some(Ok(publish)) => {
                let tag = self.next_tag;
                self.next_tag += 1;
                let payload = publish.payload.to_vec();
                self.unacked.push((tag, publish));
                Ok(Delivery { payload, tag })
            }
            Some(Err(e)) => Err(e),
            None => Err(lost("MQTT event loop stopped")),
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let index = self
            .unacked
            .iter()
            .position(|(t, _)| *t == tag)
            .ok_or_else(|| lost(format!("unknown delivery tag {tag}")))?;
        let (_, publish) = self.unacked.remove(index);
        self.client.ack(&publish).await.map_err(lost)
    }

    async fn close(&mut self) {
        // Unacked publishes stay with the broker's persistent session.
        let _ = self.client.disconnect().await;
        self.driver.abort();
    }
}

impl Drop for MqttConsumer {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    driver: JoinHandle<ConnectionError>,
}

#[async_trait]
impl TelemetryPublisher for MqttPublisher {
    async fn publish(&mut self, frame: Frame) -> Result<(), BrokerError> {
        if self.driver.is_finished() {
            return Err(lost("MQTT event loop stopped"));
        }
        self.client
            .publish(&self.topic, QoS::AtMostOnce, false, frame.as_bytes().to_vec())
            .await
            .map_err(lost)
    }

    async fn close(&mut self) {
        let _ = self.client.disconnect().await;
        self.driver.abort();
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

// ── Client side ───────────────────────────────────────────────────────────────

/// Long-lived client-side connection used by the web bridge.
///
/// A background task services the connection: it resubscribes to the
/// telemetry topic after every (re)connect, feeds received frames into a local
/// drop-oldest queue, and waits the retry interval after each failure.
///
/// Published commands go into an unbounded local buffer that a second task
/// hands to rumqttc in order, waiting whenever rumqttc's request channel is
/// full.  A command accepted while the broker is down is therefore held until
/// the connection is back instead of being rejected.  The session is
/// persistent (fixed client id, `clean_session = false`) so QoS 1 commands in
/// flight when the connection dropped are retransmitted after the reconnect.
#[derive(Debug)]
pub struct MqttBrokerClient {
    client: AsyncClient,
    commands: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    backlog: Arc<AtomicUsize>,
    telemetry: Arc<TelemetryQueue>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// MQTT options of the web bridge's connection.
fn client_options(config: &BrokerConfig) -> MqttOptions {
    let client_id = format!("{}-web", config.client_id_prefix);
    mqtt_options(config, &client_id, false)
}

impl MqttBrokerClient {
    /// Starts the connection task.  It runs until [`shutdown`](Self::shutdown).
    pub fn start(config: &BrokerConfig) -> Self {
        let (client, eventloop) = AsyncClient::new(client_options(config), REQUEST_CAPACITY);
        let telemetry = Arc::new(TelemetryQueue::new(config.telemetry_capacity));
        let backlog = Arc::new(AtomicUsize::new(0));
        let (commands, queued) = mpsc::unbounded_channel();

        let forwarder = tokio::spawn(forward_commands(
            client.clone(),
            config.command_topic.clone(),
            queued,
            Arc::clone(&backlog),
        ));
        let driver = tokio::spawn(drive_client(
            client.clone(),
            eventloop,
            Arc::clone(&telemetry),
            config.clone(),
        ));

        Self {
            client,
            commands: Mutex::new(Some(commands)),
            backlog,
            telemetry,
            forwarder: Mutex::new(Some(forwarder)),
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Commands accepted but not yet handed to rumqttc.
    pub fn queued_commands(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    /// Flushes queued commands, disconnects and stops the connection task.
    ///
    /// Waits at most [`SHUTDOWN_GRACE`] in total for the broker; commands
    /// still queued after that are dropped.  Commands published after this
    /// call are rejected with [`BrokerError::Closed`].
    pub async fn shutdown(&self) {
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;

        // Closing the buffer lets the forwarder finish once it is drained.
        drop(take(&self.commands));
        if let Some(mut forwarder) = take(&self.forwarder) {
            if tokio::time::timeout_at(deadline, &mut forwarder).await.is_err() {
                warn!(
                    dropped = self.queued_commands(),
                    "queued commands not sent before shutdown"
                );
                forwarder.abort();
            }
        }

        let _ = self.client.try_disconnect();
        if let Some(mut driver) = take(&self.driver) {
            if tokio::time::timeout_at(deadline, &mut driver).await.is_err() {
                warn!("broker connection did not close in time; dropping it");
                driver.abort();
            }
        }
        self.telemetry.close();
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Hands buffered commands to rumqttc one by one, in publish order.
async fn forward_commands(
    client: AsyncClient,
    topic: String,
    mut queued: mpsc::UnboundedReceiver<Frame>,
    backlog: Arc<AtomicUsize>,
) {
    while let Some(frame) = queued.recv().await {
        let sent = client
            .publish(&topic, QoS::AtLeastOnce, false, frame.as_bytes().to_vec())
            .await;
        backlog.fetch_sub(1, Ordering::AcqRel);
        if let Err(e) = sent {
            warn!(%frame, error = %e, "broker connection task gone; command dropped");
            return;
        }
    }
    debug!("command forwarder stopped");
}

async fn drive_client(
    client: AsyncClient,
    mut eventloop: EventLoop,
    telemetry: Arc<TelemetryQueue>,
    config: BrokerConfig,
) {
    let mut attempt: u32 = 0;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                attempt = 0;
                info!(endpoint = %config.endpoint(), "web bridge connected to broker");
                if let Err(e) = client.try_subscribe(&config.telemetry_topic, QoS::AtMostOnce) {
                    warn!(error = %e, "failed to subscribe to telemetry channel");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match Frame::try_from(publish.payload.as_ref()) {
                    Ok(frame) => {
                        telemetry.push(frame);
                    }
                    Err(_) => {
                        let e = BrokerError::Malformed {
                            channel: publish.topic.clone(),
                            len: publish.payload.len(),
                        };
                        warn!(error = %e, "skipping telemetry message");
                    }
                }
            }
            // Everything queued before the disconnect request has been sent.
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                attempt += 1;
                warn!(
                    attempt,
                    error = %e,
                    "broker connection failed, retrying in {}s",
                    config.retry_interval.as_secs_f32()
                );
                tokio::time::sleep(config.retry_interval).await;
            }
        }
    }
    telemetry.close();
    debug!("broker client task stopped");
}

#[async_trait]
impl CommandPublisher for MqttBrokerClient {
    async fn publish_command(&self, frame: Frame) -> Result<(), BrokerError> {
        let commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = commands.as_ref().ok_or(BrokerError::Closed)?;
        self.backlog.fetch_add(1, Ordering::AcqRel);
        sender.send(frame).map_err(|_| {
            self.backlog.fetch_sub(1, Ordering::AcqRel);
            BrokerError::Closed
        })
    }
}

#[async_trait]
impl TelemetrySource for MqttBrokerClient {
    async fn subscribe_telemetry(&self) -> Result<TelemetrySubscription, BrokerError> {
        if self.telemetry.is_closed() {
            return Err(BrokerError::Closed);
        }
        let (subscription, purged) = TelemetrySubscription::attach(Arc::clone(&self.telemetry));
        info!(purged, "telemetry subscriber attached; stale backlog purged");
        Ok(subscription)
    }
}
