//! Device control: turns client requests into published command frames.
//!
//! [`DeviceService`] owns the [`DeviceStateTracker`] behind an async mutex.
//! Every request takes the lock, asks the tracker which frames it needs,
//! publishes them in order and saves a snapshot, all before releasing the
//! lock.  Two clients opening different modes at the same time therefore
//! never interleave their close/open pairs on the command channel.
//!
//! Acceptance is what changes the state, not delivery: the device never
//! acknowledges a command, so once the tracker accepted a request the state
//! is committed and saved even if publishing then fails.

use std::sync::Arc;

use bench_broker::{BrokerError, CommandPublisher};
use bench_core::protocol::commands::{led_frame, parse_led_list, voltage_frame, waveform_frame};
use bench_core::{
    CommandError, DeviceFamily, DeviceState, DeviceStateTracker, Frame, Sensor, StateStore,
    StreamMode, Waveform,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::messages::{ClientRequest, ServerMessage, StatusView};

/// Why a request could not be carried out.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request named an unsupported mode, sensor, LED, voltage,
    /// waveform or frequency.  Nothing was published.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The command channel refused a frame.
    #[error("command channel unavailable: {0}")]
    Broker(#[from] BrokerError),
}

/// Serialized access to the device state plus command publishing.
pub struct DeviceService {
    tracker: Mutex<DeviceStateTracker>,
    commands: Arc<dyn CommandPublisher>,
    store: Arc<dyn StateStore>,
}

impl DeviceService {
    /// Creates the service, restoring the last snapshot from `store`.
    ///
    /// A snapshot that cannot be read is logged and ignored; the device then
    /// starts idle with every LED off.
    pub fn new(commands: Arc<dyn CommandPublisher>, store: Arc<dyn StateStore>) -> Self {
        let tracker = match store.load() {
            Ok(Some(state)) => {
                info!(
                    mode = ?state.current_mode,
                    leds_on = ?state.leds.lit(),
                    "device state restored from snapshot"
                );
                DeviceStateTracker::with_state(state)
            }
            Ok(None) => DeviceStateTracker::new(),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable state snapshot; starting idle");
                DeviceStateTracker::new()
            }
        };
        Self {
            tracker: Mutex::new(tracker),
            commands,
            store,
        }
    }

    /// Carries out one client request and builds the reply.
    pub async fn handle(&self, request: ClientRequest) -> ServerMessage {
        let kind = request.kind();
        let result = match request {
            ClientRequest::GetStatus => {
                return ServerMessage::Status(StatusView::from(&self.status().await));
            }
            ClientRequest::OpenMode { mode } => match mode.parse::<StreamMode>() {
                Ok(mode) => self.open_mode(mode).await,
                Err(e) => Err(ServiceError::from(e)),
            },
            ClientRequest::CloseMode => self.close_mode().await,
            ClientRequest::CloseOscilloscope => self.close_family(DeviceFamily::Oscilloscope).await,
            ClientRequest::CloseMultimeter => self.close_family(DeviceFamily::Multimeter).await,
            ClientRequest::ReadSensor { sensor } => match sensor.parse::<Sensor>() {
                Ok(sensor) => self.read_sensor(sensor).await,
                Err(e) => Err(ServiceError::from(e)),
            },
            ClientRequest::SetLeds { numbers, on } => match parse_led_list(&numbers) {
                Ok(ids) => self.set_leds(&ids, on).await,
                Err(e) => Err(ServiceError::from(e)),
            },
            ClientRequest::SetAllLeds { on } => self.set_all_leds(on).await,
            ClientRequest::SetVoltage { volts } => self.set_voltage(volts).await,
            ClientRequest::SetWaveform {
                waveform,
                frequency,
            } => match waveform.parse::<Waveform>() {
                Ok(waveform) => self.set_waveform(waveform, frequency).await,
                Err(e) => Err(ServiceError::from(e)),
            },
        };

        match result {
            Ok(frames) => ServerMessage::accepted(&frames),
            Err(e) => {
                warn!(request = kind, error = %e, "request rejected");
                ServerMessage::error(e)
            }
        }
    }

    /// Starts `mode`, closing a different running mode first.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Broker`] if a frame could not be published.
    pub async fn open_mode(&self, mode: StreamMode) -> Result<Vec<Frame>, ServiceError> {
        let mut tracker = self.tracker.lock().await;
        let frames = tracker.request_mode_switch(mode).frames();
        self.commit(&tracker, &frames).await?;
        Ok(frames)
    }

    /// Stops the running mode.  Publishes nothing when the device is idle.
    pub async fn close_mode(&self) -> Result<Vec<Frame>, ServiceError> {
        let mut tracker = self.tracker.lock().await;
        let frames: Vec<Frame> = tracker.request_close().into_iter().collect();
        self.commit(&tracker, &frames).await?;
        Ok(frames)
    }

    /// Sends `family`'s close frame, whether or not it is the running one.
    pub async fn close_family(&self, family: DeviceFamily) -> Result<Vec<Frame>, ServiceError> {
        let mut tracker = self.tracker.lock().await;
        let frames = vec![tracker.close_family(family)];
        self.commit(&tracker, &frames).await?;
        Ok(frames)
    }

    /// One-shot read, followed by the open frame of the mode it interrupted.
    pub async fn read_sensor(&self, sensor: Sensor) -> Result<Vec<Frame>, ServiceError> {
        let tracker = self.tracker.lock().await;
        let frames = tracker.one_shot_wrap(sensor.read_frame());
        self.publish_all(&frames).await?;
        Ok(frames)
    }

    /// Switches each LED in `ids` on or off.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Command`] if any id is outside 1..=9.  The whole list
    /// is checked before the state changes or anything is published.
    pub async fn set_leds(&self, ids: &[u8], on: bool) -> Result<Vec<Frame>, ServiceError> {
        let frames = ids
            .iter()
            .map(|id| led_frame(*id, on))
            .collect::<Result<Vec<Frame>, CommandError>>()?;

        let mut tracker = self.tracker.lock().await;
        for id in ids {
            tracker.set_led(*id, on)?;
        }
        self.commit(&tracker, &frames).await?;
        Ok(frames)
    }

    pub async fn set_all_leds(&self, on: bool) -> Result<Vec<Frame>, ServiceError> {
        let mut tracker = self.tracker.lock().await;
        let frames = tracker.set_all_leds(on);
        self.commit(&tracker, &frames).await?;
        Ok(frames)
    }

    /// Sets the programmable supply.  Stateless.
    pub async fn set_voltage(&self, volts: f64) -> Result<Vec<Frame>, ServiceError> {
        let frames = vec![voltage_frame(volts)?];
        let _tracker = self.tracker.lock().await;
        self.publish_all(&frames).await?;
        Ok(frames)
    }

    /// Sets the signal generator.  Stateless.
    pub async fn set_waveform(
        &self,
        waveform: Waveform,
        frequency_hz: u32,
    ) -> Result<Vec<Frame>, ServiceError> {
        let frames = vec![waveform_frame(waveform, frequency_hz)?];
        let _tracker = self.tracker.lock().await;
        self.publish_all(&frames).await?;
        Ok(frames)
    }

    /// Read-only copy of the device state.
    pub async fn status(&self) -> DeviceState {
        self.tracker.lock().await.snapshot()
    }

    /// Closes the running mode when a client goes away, so an abandoned
    /// client cannot leave the device streaming.
    ///
    /// Returns the close frame that was published, if any.
    pub async fn release_on_disconnect(&self) -> Result<Option<Frame>, ServiceError> {
        let mut tracker = self.tracker.lock().await;
        let Some(frame) = tracker.request_close() else {
            return Ok(None);
        };
        info!(%frame, "client left with a streaming mode running; closing it");
        self.commit(&tracker, &[frame]).await?;
        Ok(Some(frame))
    }

    /// Saves the accepted state, then publishes its frames.
    async fn commit(&self, tracker: &DeviceStateTracker, frames: &[Frame]) -> Result<(), ServiceError> {
        // The state is committed once accepted; a failed save only costs
        // restart recovery.
        if let Err(e) = self.store.save(&tracker.snapshot()) {
            warn!(error = %e, "failed to save state snapshot");
        }
        self.publish_all(frames).await
    }

    async fn publish_all(&self, frames: &[Frame]) -> Result<(), ServiceError> {
        for frame in frames {
            self.commands.publish_command(*frame).await?;
            debug!(%frame, "command published");
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
