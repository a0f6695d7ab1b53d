//! Telemetry relay: one live telemetry feed per connected client.
//!
//! Attaching purges whatever backlog is queued, so a client never sees frames
//! produced before it connected.  Frames then flow in publish order until
//! either side goes away; there is no replay buffer.  When the client leaves,
//! the running streaming mode is closed.

use std::sync::Arc;

use async_trait::async_trait;
use bench_broker::{BrokerError, TelemetrySource, TelemetrySubscription};
use bench_core::Frame;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::device_service::DeviceService;

/// The client hung up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("client disconnected")]
pub struct ClientGone;

/// Where relayed frames go.  The WebSocket session implements this; tests
/// collect into a vector.
#[async_trait]
pub trait FrameSink: Send {
    async fn deliver(&mut self, frame: Frame) -> Result<(), ClientGone>;
}

/// Why a relay loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The telemetry source shut down.
    SourceClosed,
    ClientGone,
}

/// Attaches clients to the telemetry channel and releases the device when
/// they leave.
pub struct TelemetryRelay {
    source: Arc<dyn TelemetrySource>,
    service: Arc<DeviceService>,
}

impl TelemetryRelay {
    pub fn new(source: Arc<dyn TelemetrySource>, service: Arc<DeviceService>) -> Self {
        Self { source, service }
    }

    /// The device service clients' requests go to.
    pub fn service(&self) -> &Arc<DeviceService> {
        &self.service
    }

    /// Subscribes a new client, purging the stale backlog.
    ///
    /// # Errors
    ///
    /// Returns the [`BrokerError`] if the telemetry channel is unavailable.
    pub async fn attach(&self, client: &str) -> Result<TelemetrySubscription, BrokerError> {
        let subscription = self.source.subscribe_telemetry().await?;
        info!(client, "telemetry client attached");
        Ok(subscription)
    }

    /// Delivers frames from `subscription` to `sink` until one of them ends.
    pub async fn relay<S: FrameSink + ?Sized>(
        &self,
        mut subscription: TelemetrySubscription,
        sink: &mut S,
    ) -> RelayEnd {
        while let Some(frame) = subscription.recv().await {
            if sink.deliver(frame).await.is_err() {
                return RelayEnd::ClientGone;
            }
            debug!(%frame, "telemetry frame relayed");
        }
        RelayEnd::SourceClosed
    }

    /// Called once per client when it disconnects.  Closes the running
    /// streaming mode, if any.
    pub async fn detach(&self, client: &str) {
        info!(client, "telemetry client detached");
        match self.service.release_on_disconnect().await {
            Ok(Some(frame)) => info!(client, %frame, "streaming mode closed after disconnect"),
            Ok(None) => {}
            Err(e) => warn!(client, error = %e, "failed to close streaming mode after disconnect"),
        }
    }
}
