//! # bench-broker
//!
//! The message bus between clients and the serial bridge.
//!
//! Two logical channels exist:
//!
//! - the **command channel**: clients publish 4-byte command frames, the serial
//!   bridge consumes them and acknowledges each one only after it reached the
//!   serial port (at-least-once delivery);
//! - the **telemetry channel**: the serial bridge publishes every frame the
//!   device produced, clients subscribe.  The channel is bounded (50 frames by
//!   default) and drops the oldest frame on overflow.  A new subscription purges
//!   the backlog first, so a client never sees frames produced before it attached.
//!
//! The channels are described by the traits in [`channel`].  Two
//! implementations are provided: [`MemoryBroker`] (in-process, used by tests
//! and single-process setups) and [`mqtt`] (an MQTT broker reached through
//! `rumqttc`).  [`retry::connect_with_retry`] implements the fixed-interval
//! reconnect policy both bridge directions share.

pub mod channel;
pub mod config;
pub mod error;
pub mod memory;
pub mod mqtt;
pub mod queue;
pub mod retry;

pub use channel::{
    Broker, CommandConsumer, CommandPublisher, Delivery, DeliveryTag, TelemetryPublisher,
    TelemetrySource, TelemetrySubscription,
};
pub use config::{BrokerArgs, BrokerConfig};
pub use error::BrokerError;
pub use memory::MemoryBroker;
pub use queue::TelemetryQueue;
pub use retry::{connect_with_retry, wait_for_shutdown};
