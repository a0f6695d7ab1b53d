//! Telemetry bridge: serial port → telemetry channel.
//!
//! The serial worker pushes every decoded frame into a bounded, drop-oldest
//! [`TelemetryQueue`].  This loop takes frames from it in order and publishes
//! them.  While the broker is unreachable the queue keeps absorbing frames, so
//! only the most recent window survives an outage; the frame whose publish
//! failed is retried first after reconnecting.

use std::sync::Arc;
use std::time::Duration;

use bench_broker::{connect_with_retry, wait_for_shutdown, Broker, TelemetryPublisher, TelemetryQueue};
use bench_core::Frame;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::infrastructure::serial::SerialError;

/// How a publisher session ended.
enum SessionEnd {
    Shutdown,
    /// The broker dropped; carries the frame that still has to be published.
    BrokerLost(Frame),
    /// The serial worker stopped feeding the queue.
    SourceClosed,
}

/// Relays frames from the serial receive queue to the broker.
pub struct TelemetryBridge {
    broker: Arc<dyn Broker>,
    telemetry: Arc<TelemetryQueue>,
    retry_interval: Duration,
}

impl TelemetryBridge {
    pub fn new(broker: Arc<dyn Broker>, telemetry: Arc<TelemetryQueue>, retry_interval: Duration) -> Self {
        Self {
            broker,
            telemetry,
            retry_interval,
        }
    }

    /// Runs until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`SerialError::WorkerStopped`] if the serial worker stops
    /// before shutdown was requested.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), SerialError> {
        info!(endpoint = %self.broker.endpoint(), "telemetry bridge starting");
        let mut pending: Option<Frame> = None;
        loop {
            let publisher = connect_with_retry(
                "telemetry bridge",
                self.retry_interval,
                &mut shutdown,
                || self.broker.connect_publisher(),
            )
            .await;
            let Some(mut publisher) = publisher else {
                info!("telemetry bridge stopped");
                return Ok(());
            };

            let end = self
                .serve(publisher.as_mut(), pending.take(), &mut shutdown)
                .await;
            publisher.close().await;
            match end {
                SessionEnd::Shutdown => {
                    info!("telemetry bridge stopped");
                    return Ok(());
                }
                SessionEnd::BrokerLost(frame) => pending = Some(frame),
                SessionEnd::SourceClosed => return Err(SerialError::WorkerStopped),
            }
        }
    }

    async fn serve(
        &self,
        publisher: &mut dyn TelemetryPublisher,
        mut pending: Option<Frame>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            let frame = match pending.take() {
                Some(frame) => frame,
                None => {
                    let next = tokio::select! {
                        next = self.telemetry.recv() => next,
                        _ = wait_for_shutdown(shutdown) => return SessionEnd::Shutdown,
                    };
                    match next {
                        Some(frame) => frame,
                        None => return SessionEnd::SourceClosed,
                    }
                }
            };

            if let Err(e) = publisher.publish(frame).await {
                warn!(error = %e, "telemetry channel lost; reconnecting");
                return SessionEnd::BrokerLost(frame);
            }
            debug!(%frame, "telemetry frame published");
        }
    }
}
