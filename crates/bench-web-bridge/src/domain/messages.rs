//! JSON message types for the client-facing WebSocket protocol.
//!
//! The device speaks 4-byte frames; browsers speak JSON.  Clients send
//! [`ClientRequest`]s naming what they want done ("open the DC voltmeter",
//! "switch LEDs 1 and 3 on"), and the bridge answers with [`ServerMessage`]s.
//! Telemetry frames arrive as `Telemetry` messages carrying the frame in hex.
//!
//! # Message flow
//!
//! ```text
//! Client → Bridge:  JSON text frame  →  ClientRequest  →  command frames
//! Bridge → Client:  ServerMessage    →  JSON text frame
//! ```
//!
//! # JSON discriminant
//!
//! Every message is a JSON object with a `"type"` field that identifies the
//! variant.  For example:
//!
//! ```json
//! {"type":"OpenMode","mode":"dcv"}
//! {"type":"SetLeds","numbers":"1,3","on":true}
//! {"type":"Telemetry","frame":"0b0019fe"}
//! ```

use std::collections::BTreeMap;

use bench_core::{DeviceState, Frame, StreamMode};
use serde::{Deserialize, Serialize};

// ── Client → Bridge ───────────────────────────────────────────────────────────

/// All requests a client can send over the WebSocket.
///
/// Names (modes, sensors, waveforms) are kept as strings here and parsed in
/// the application layer, so an unknown name becomes an `Error` reply
/// rather than a JSON decoding failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    /// Start a streaming mode, closing any other running mode first.
    ///
    /// `mode` accepts the full names (`"dc_voltage"`) and the short UI
    /// names (`"dcv"`, `"occ"`, ...).
    OpenMode { mode: String },

    /// Close whichever streaming mode is running.
    CloseMode,

    CloseOscilloscope,

    CloseMultimeter,

    /// One-shot sensor read: `"temperature"`, `"gesture"`, `"distance"` or
    /// `"light"`.  A running streaming mode is restored afterwards.
    ReadSensor { sensor: String },

    /// Switch a comma separated list of LEDs (`"1,3,5"`) on or off.
    SetLeds { numbers: String, on: bool },

    SetAllLeds { on: bool },

    /// Programmable supply voltage in volts.
    SetVoltage { volts: f64 },

    /// Signal generator output.  `frequency` is in Hz.
    SetWaveform { waveform: String, frequency: u32 },

    GetStatus,
}

impl ClientRequest {
    /// Variant name, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientRequest::OpenMode { .. } => "OpenMode",
            ClientRequest::CloseMode => "CloseMode",
            ClientRequest::CloseOscilloscope => "CloseOscilloscope",
            ClientRequest::CloseMultimeter => "CloseMultimeter",
            ClientRequest::ReadSensor { .. } => "ReadSensor",
            ClientRequest::SetLeds { .. } => "SetLeds",
            ClientRequest::SetAllLeds { .. } => "SetAllLeds",
            ClientRequest::SetVoltage { .. } => "SetVoltage",
            ClientRequest::SetWaveform { .. } => "SetWaveform",
            ClientRequest::GetStatus => "GetStatus",
        }
    }
}

// ── Bridge → Client ───────────────────────────────────────────────────────────

/// Everything the bridge sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// One frame produced by the device, as lowercase hex (`"0b0019fe"`).
    Telemetry { frame: String },

    /// The request was accepted; these frames were published, in order.
    /// Empty when there was nothing to send (closing an idle device).
    Accepted { frames: Vec<String> },

    Status(StatusView),

    /// The request was rejected or could not be published.
    Error { message: String },
}

impl ServerMessage {
    pub fn telemetry(frame: Frame) -> Self {
        ServerMessage::Telemetry {
            frame: frame.to_hex(),
        }
    }

    pub fn accepted(frames: &[Frame]) -> Self {
        ServerMessage::Accepted {
            frames: frames.iter().map(Frame::to_hex).collect(),
        }
    }

    pub fn error(message: impl ToString) -> Self {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }
}

/// Button state shown by the web UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonState {
    Opened,
    Closed,
}

impl ButtonState {
    fn of(active: bool) -> Self {
        if active {
            ButtonState::Opened
        } else {
            ButtonState::Closed
        }
    }
}

/// Device state plus the per-button view the UI renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    /// Name of the running streaming mode, or `null` when idle.
    pub current_mode: Option<String>,
    /// Open frame of the running mode in hex, or `null` when idle.
    pub current_mode_frame: Option<String>,
    /// Ids of the LEDs that are on, ascending.
    pub leds_on: Vec<u8>,
    pub oscilloscope: ButtonState,
    /// One entry per multimeter sub-mode, keyed by mode name.
    pub multimeter: BTreeMap<String, ButtonState>,
}

impl From<&DeviceState> for StatusView {
    fn from(state: &DeviceState) -> Self {
        let active = |mode: StreamMode| ButtonState::of(state.current_mode == Some(mode));
        let multimeter = StreamMode::ALL
            .into_iter()
            .filter(|mode| *mode != StreamMode::Oscilloscope)
            .map(|mode| (mode.name().to_string(), active(mode)))
            .collect();

        Self {
            current_mode: state.current_mode.map(|mode| mode.name().to_string()),
            current_mode_frame: state.current_mode.map(|mode| mode.open_frame().to_hex()),
            leds_on: state.leds.lit(),
            oscilloscope: active(StreamMode::Oscilloscope),
            multimeter,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
