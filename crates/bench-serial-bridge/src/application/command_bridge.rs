//! Command bridge: command channel → serial port.
//!
//! Takes one command at a time from the command channel, writes it to the
//! device, and acknowledges it only after the write returned.  A crash or
//! broker drop between the write and the acknowledgement therefore leads to a
//! redelivery, which is harmless: every command frame is idempotent on the
//! wire.
//!
//! After an oscilloscope or multimeter close frame the receive buffer is
//! discarded, because anything still queued there is trailing output of the
//! mode that was just closed.
//!
//! Broker failures are never fatal: the session is dropped and a new one is
//! opened at the fixed retry interval.  Serial failures are fatal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bench_broker::{connect_with_retry, wait_for_shutdown, Broker, BrokerError, CommandConsumer};
use bench_core::protocol::commands::is_close_frame;
use bench_core::Frame;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::infrastructure::serial::SerialError;

/// Output side of the command bridge.
///
/// The infrastructure implementation forwards to the serial worker thread;
/// tests record calls.
#[async_trait]
pub trait FrameWriter: Send + Sync {
    /// Writes one whole frame.  Returns once the bytes were handed to the port.
    async fn write_frame(&self, frame: Frame) -> Result<(), SerialError>;

    /// Writes `frame`, then discards received but unread bytes, with no read
    /// in between.  Returns how many bytes were dropped.
    async fn write_and_discard(&self, frame: Frame) -> Result<usize, SerialError>;
}

/// Why a consumer session ended.
enum SessionEnd {
    Shutdown,
    BrokerLost(BrokerError),
}

/// Relays commands from the broker to a [`FrameWriter`].
pub struct CommandBridge<W> {
    broker: Arc<dyn Broker>,
    writer: W,
    retry_interval: Duration,
}

impl<W: FrameWriter> CommandBridge<W> {
    pub fn new(broker: Arc<dyn Broker>, writer: W, retry_interval: Duration) -> Self {
        Self {
            broker,
            writer,
            retry_interval,
        }
    }

    /// Runs until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns the [`SerialError`] that made further delivery impossible.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), SerialError> {
        info!(endpoint = %self.broker.endpoint(), "command bridge starting");
        loop {
            let consumer = connect_with_retry(
                "command bridge",
                self.retry_interval,
                &mut shutdown,
                || self.broker.connect_consumer(),
            )
            .await;
            let Some(mut consumer) = consumer else {
                info!("command bridge stopped");
                return Ok(());
            };

            let outcome = self.serve(consumer.as_mut(), &mut shutdown).await;
            consumer.close().await;
            match outcome {
                Ok(SessionEnd::Shutdown) => {
                    info!("command bridge stopped");
                    return Ok(());
                }
                Ok(SessionEnd::BrokerLost(e)) => {
                    warn!(error = %e, "command channel lost; reconnecting");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drains one consumer session.
    async fn serve(
        &self,
        consumer: &mut dyn CommandConsumer,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, SerialError> {
        loop {
            let delivery = tokio::select! {
                delivery = consumer.next_command() => delivery,
                _ = wait_for_shutdown(shutdown) => return Ok(SessionEnd::Shutdown),
            };
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => return Ok(SessionEnd::BrokerLost(e)),
            };

            match delivery.frame() {
                Ok(frame) => self.apply(frame).await?,
                // Malformed payloads are still acked, then dropped.
                Err(e) => warn!(
                    payload = %hex::encode(&delivery.payload),
                    error = %e,
                    "discarding malformed command"
                ),
            }

            if let Err(e) = consumer.ack(delivery.tag).await {
                return Ok(SessionEnd::BrokerLost(e));
            }
        }
    }

    async fn apply(&self, frame: Frame) -> Result<(), SerialError> {
        if is_close_frame(&frame) {
            let dropped = self.writer.write_and_discard(frame).await?;
            info!(%frame, "command written to device");
            debug!(dropped, "receive buffer discarded after close command");
        } else {
            self.writer.write_frame(frame).await?;
            info!(%frame, "command written to device");
        }
        Ok(())
    }
}
