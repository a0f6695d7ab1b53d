//! Device command catalog.
//!
//! Every frame the bridge may ever send to the instrument is built here.  The
//! builders validate their inputs first: an unsupported LED id, voltage,
//! waveform or frequency is rejected with [`CommandError::InvalidParameter`]
//! and no frame is constructed.
//!
//! # Opcode table
//!
//! | Function                | Opcode        | Parameter                         |
//! |-------------------------|---------------|-----------------------------------|
//! | Gesture read (one-shot) | `0x00`        | `0x0001`                          |
//! | Multimeter close        | `0x01`        | `0x0000`                          |
//! | Multimeter open         | `0x02..=0x06` | sub-mode selector `0x0001..=0005` |
//! | Oscilloscope close      | `0x07`        | `0x0000`                          |
//! | Oscilloscope open       | `0x08`        | `0x0001`                          |
//! | Programmable voltage    | `0x09`        | discrete code                     |
//! | Temperature read        | `0x0B`        | `0x0001`                          |
//! | Distance read           | `0x0C`        | `0x0001`                          |
//! | Light read              | `0x0E`        | `0x0001`                          |
//! | LED 1..9                | `0x10..=0x18` | `0x0001` on / `0x0000` off        |
//! | Waveform                | `0x30`        | hi = waveform, lo = frequency     |

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::protocol::codec::Frame;

/// Opcode of the first LED; LED `n` uses `OP_LED_BASE + (n - 1)`.
pub const OP_LED_BASE: u8 = 0x10;
/// Number of addressable LEDs.
pub const LED_COUNT: u8 = 9;
pub const OP_VOLTAGE: u8 = 0x09;
pub const OP_WAVEFORM: u8 = 0x30;

/// Closes whichever multimeter sub-mode is running.
pub const CLOSE_MULTIMETER: Frame = Frame::command(0x01, 0x0000);
/// Closes the oscilloscope.
pub const CLOSE_OSCILLOSCOPE: Frame = Frame::command(0x07, 0x0000);

/// Lowest and highest voltage the programmable supply accepts.
pub const VOLTAGE_RANGE: (f64, f64) = (0.0, 10.1);

/// Errors raised while building a command from client-supplied parameters.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    /// A parameter names something the device does not support.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl CommandError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }
}

// ── Streaming modes ──────────────────────────────────────────────────────────

/// A long-running device function that streams telemetry until closed.
///
/// "No mode" is expressed as `Option<StreamMode>::None`, so at most one mode
/// can be represented as active by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamMode {
    Oscilloscope,
    MultimeterResistance,
    MultimeterContinuity,
    MultimeterDcVoltage,
    MultimeterAcVoltage,
    MultimeterDcCurrent,
}

/// The physical instrument a [`StreamMode`] belongs to.  Each family has its
/// own close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    Oscilloscope,
    Multimeter,
}

impl DeviceFamily {
    /// The canonical close frame for this instrument.
    pub const fn close_frame(self) -> Frame {
        match self {
            DeviceFamily::Oscilloscope => CLOSE_OSCILLOSCOPE,
            DeviceFamily::Multimeter => CLOSE_MULTIMETER,
        }
    }
}

impl StreamMode {
    /// Every streaming mode, in opcode order of the open frames.
    pub const ALL: [StreamMode; 6] = [
        StreamMode::Oscilloscope,
        StreamMode::MultimeterResistance,
        StreamMode::MultimeterContinuity,
        StreamMode::MultimeterDcVoltage,
        StreamMode::MultimeterAcVoltage,
        StreamMode::MultimeterDcCurrent,
    ];

    /// The single frame that starts this mode.
    pub const fn open_frame(self) -> Frame {
        match self {
            StreamMode::Oscilloscope => Frame::command(0x08, 0x0001),
            StreamMode::MultimeterResistance => Frame::command(0x02, 0x0001),
            StreamMode::MultimeterContinuity => Frame::command(0x03, 0x0002),
            StreamMode::MultimeterDcVoltage => Frame::command(0x04, 0x0003),
            StreamMode::MultimeterAcVoltage => Frame::command(0x05, 0x0004),
            StreamMode::MultimeterDcCurrent => Frame::command(0x06, 0x0005),
        }
    }

    pub const fn family(self) -> DeviceFamily {
        match self {
            StreamMode::Oscilloscope => DeviceFamily::Oscilloscope,
            _ => DeviceFamily::Multimeter,
        }
    }

    /// The frame that returns the device from this mode to idle.
    pub const fn close_frame(self) -> Frame {
        self.family().close_frame()
    }

    /// Recovers the mode from its open frame (used when loading snapshots).
    pub fn from_open_frame(frame: Frame) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.open_frame() == frame)
    }

    /// Short client-facing name, e.g. `"dc_voltage"`.
    pub const fn name(self) -> &'static str {
        match self {
            StreamMode::Oscilloscope => "oscilloscope",
            StreamMode::MultimeterResistance => "resistance",
            StreamMode::MultimeterContinuity => "continuity",
            StreamMode::MultimeterDcVoltage => "dc_voltage",
            StreamMode::MultimeterAcVoltage => "ac_voltage",
            StreamMode::MultimeterDcCurrent => "dc_current",
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamMode {
    type Err = CommandError;

    /// Accepts the short names plus the abbreviations used by the web UI
    /// (`occ`, `cont`, `dcv`, `acv`, `dca`).  Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oscilloscope" | "occ" => Ok(StreamMode::Oscilloscope),
            "resistance" | "resistense" => Ok(StreamMode::MultimeterResistance),
            "continuity" | "cont" => Ok(StreamMode::MultimeterContinuity),
            "dc_voltage" | "dcv" => Ok(StreamMode::MultimeterDcVoltage),
            "ac_voltage" | "acv" => Ok(StreamMode::MultimeterAcVoltage),
            "dc_current" | "dca" => Ok(StreamMode::MultimeterDcCurrent),
            other => Err(CommandError::invalid(format!("unknown streaming mode '{other}'"))),
        }
    }
}

/// Returns `true` for the oscilloscope and multimeter close frames.
///
/// After writing one of these the serial bridge discards the receive buffer:
/// anything still queued there is trailing output of the closed mode.
pub fn is_close_frame(frame: &Frame) -> bool {
    *frame == CLOSE_OSCILLOSCOPE || *frame == CLOSE_MULTIMETER
}

// ── One-shot sensor reads ────────────────────────────────────────────────────

/// Sensors that return a single reading on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    Temperature,
    Gesture,
    Distance,
    Light,
}

impl Sensor {
    pub const fn read_frame(self) -> Frame {
        match self {
            Sensor::Temperature => Frame::command(0x0B, 0x0001),
            Sensor::Gesture => Frame::command(0x00, 0x0001),
            Sensor::Distance => Frame::command(0x0C, 0x0001),
            Sensor::Light => Frame::command(0x0E, 0x0001),
        }
    }
}

impl FromStr for Sensor {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temperature" => Ok(Sensor::Temperature),
            "gesture" => Ok(Sensor::Gesture),
            "distance" => Ok(Sensor::Distance),
            "light" => Ok(Sensor::Light),
            other => Err(CommandError::invalid(format!("unknown sensor '{other}'"))),
        }
    }
}

// ── LEDs ─────────────────────────────────────────────────────────────────────

/// Builds the on/off frame for LED `id` (1..=9).
///
/// # Errors
///
/// Returns [`CommandError::InvalidParameter`] for ids outside 1..=9.
pub fn led_frame(id: u8, on: bool) -> Result<Frame, CommandError> {
    if !(1..=LED_COUNT).contains(&id) {
        return Err(CommandError::invalid(format!(
            "LED id {id} out of range 1..={LED_COUNT}"
        )));
    }
    Ok(Frame::command(OP_LED_BASE + (id - 1), u16::from(on)))
}

/// Frames switching every LED on or off, LED 1 first.
pub fn all_led_frames(on: bool) -> Vec<Frame> {
    (1..=LED_COUNT)
        .map(|id| Frame::command(OP_LED_BASE + (id - 1), u16::from(on)))
        .collect()
}

/// Parses a comma separated LED list such as `"1, 3,5"`.
///
/// The whole list is rejected if any entry is not a number in 1..=9, so a
/// partially valid request never reaches the device.
///
/// # Errors
///
/// Returns [`CommandError::InvalidParameter`] naming the first bad entry.
pub fn parse_led_list(numbers: &str) -> Result<Vec<u8>, CommandError> {
    let ids = numbers
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<u8>()
                .ok()
                .filter(|id| (1..=LED_COUNT).contains(id))
                .ok_or_else(|| CommandError::invalid(format!("invalid LED id '{entry}'")))
        })
        .collect::<Result<Vec<u8>, CommandError>>()?;

    if ids.is_empty() {
        return Err(CommandError::invalid("empty LED list"));
    }
    Ok(ids)
}

// ── Programmable voltage ─────────────────────────────────────────────────────

/// Voltages the supply supports, with their parameter codes.
const VOLTAGE_CODES: [(f64, u16); 4] = [(0.1, 0x0001), (1.0, 0x0064), (10.0, 0x03E8), (10.1, 0x03E9)];

/// Builds the programmable-voltage frame for `volts`.
///
/// # Errors
///
/// Returns [`CommandError::InvalidParameter`] if `volts` is outside
/// [`VOLTAGE_RANGE`] or is not one of the four supported set points.
pub fn voltage_frame(volts: f64) -> Result<Frame, CommandError> {
    let (min, max) = VOLTAGE_RANGE;
    if !(min..=max).contains(&volts) {
        return Err(CommandError::invalid(format!(
            "voltage {volts} V out of range ({min}-{max} V)"
        )));
    }
    VOLTAGE_CODES
        .iter()
        .find(|(supported, _)| (supported - volts).abs() < 1e-9)
        .map(|(_, code)| Frame::command(OP_VOLTAGE, *code))
        .ok_or_else(|| CommandError::invalid(format!("unsupported voltage {volts} V")))
}

// ── Signal generator ─────────────────────────────────────────────────────────

/// Output waveform of the signal generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
}

impl Waveform {
    const fn code(self) -> u8 {
        match self {
            Waveform::Sine => 0x01,
            Waveform::Square => 0x02,
            Waveform::Triangle => 0x03,
        }
    }
}

impl FromStr for Waveform {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sine" => Ok(Waveform::Sine),
            "square" => Ok(Waveform::Square),
            "triangle" => Ok(Waveform::Triangle),
            other => Err(CommandError::invalid(format!("unknown waveform '{other}'"))),
        }
    }
}

/// Builds the signal-generator frame for a waveform at `frequency_hz`.
///
/// Only 1 Hz and 100 Hz are supported.
///
/// # Errors
///
/// Returns [`CommandError::InvalidParameter`] for any other frequency.
pub fn waveform_frame(waveform: Waveform, frequency_hz: u32) -> Result<Frame, CommandError> {
    let frequency_code: u8 = match frequency_hz {
        1 => 0x01,
        100 => 0x64,
        other => {
            return Err(CommandError::invalid(format!(
                "unsupported frequency {other} Hz"
            )))
        }
    };
    Ok(Frame::from_bytes([
        OP_WAVEFORM,
        waveform.code(),
        frequency_code,
        crate::protocol::codec::FRAME_TERMINATOR,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_frames_match_device_table() {
        assert_eq!(StreamMode::Oscilloscope.open_frame().as_bytes(), &[0x08, 0x00, 0x01, 0xFE]);
        assert_eq!(StreamMode::MultimeterResistance.open_frame().as_bytes(), &[0x02, 0x00, 0x01, 0xFE]);
        assert_eq!(StreamMode::MultimeterContinuity.open_frame().as_bytes(), &[0x03, 0x00, 0x02, 0xFE]);
        assert_eq!(StreamMode::MultimeterDcVoltage.open_frame().as_bytes(), &[0x04, 0x00, 0x03, 0xFE]);
        assert_eq!(StreamMode::MultimeterAcVoltage.open_frame().as_bytes(), &[0x05, 0x00, 0x04, 0xFE]);
        assert_eq!(StreamMode::MultimeterDcCurrent.open_frame().as_bytes(), &[0x06, 0x00, 0x05, 0xFE]);
    }

    #[test]
    fn test_close_frame_depends_on_family() {
        assert_eq!(StreamMode::Oscilloscope.close_frame(), CLOSE_OSCILLOSCOPE);
        for mode in &StreamMode::ALL[1..] {
            assert_eq!(mode.close_frame(), CLOSE_MULTIMETER, "{mode}");
        }
    }

    #[test]
    fn test_from_open_frame_recovers_every_mode() {
        for mode in StreamMode::ALL {
            assert_eq!(StreamMode::from_open_frame(mode.open_frame()), Some(mode));
        }
        assert_eq!(StreamMode::from_open_frame(CLOSE_MULTIMETER), None);
    }

    #[test]
    fn test_mode_names_and_aliases_parse() {
        assert_eq!("occ".parse::<StreamMode>().unwrap(), StreamMode::Oscilloscope);
        assert_eq!("DCV".parse::<StreamMode>().unwrap(), StreamMode::MultimeterDcVoltage);
        assert_eq!("dc_current".parse::<StreamMode>().unwrap(), StreamMode::MultimeterDcCurrent);
        assert!("spectrum".parse::<StreamMode>().is_err());
    }

    #[test]
    fn test_is_close_frame() {
        assert!(is_close_frame(&CLOSE_OSCILLOSCOPE));
        assert!(is_close_frame(&CLOSE_MULTIMETER));
        assert!(!is_close_frame(&StreamMode::Oscilloscope.open_frame()));
    }

    #[test]
    fn test_sensor_read_frames() {
        assert_eq!(Sensor::Temperature.read_frame().as_bytes(), &[0x0B, 0x00, 0x01, 0xFE]);
        assert_eq!(Sensor::Gesture.read_frame().as_bytes(), &[0x00, 0x00, 0x01, 0xFE]);
        assert_eq!(Sensor::Distance.read_frame().as_bytes(), &[0x0C, 0x00, 0x01, 0xFE]);
        assert_eq!(Sensor::Light.read_frame().as_bytes(), &[0x0E, 0x00, 0x01, 0xFE]);
        assert!("humidity".parse::<Sensor>().is_err());
    }

    #[test]
    fn test_led_frame_opcodes() {
        assert_eq!(led_frame(1, true).unwrap().as_bytes(), &[0x10, 0x00, 0x01, 0xFE]);
        assert_eq!(led_frame(9, false).unwrap().as_bytes(), &[0x18, 0x00, 0x00, 0xFE]);
    }

    #[test]
    fn test_led_frame_rejects_out_of_range_ids() {
        assert!(matches!(led_frame(0, true), Err(CommandError::InvalidParameter(_))));
        assert!(matches!(led_frame(10, true), Err(CommandError::InvalidParameter(_))));
    }

    #[test]
    fn test_all_led_frames_covers_nine_leds() {
        let frames = all_led_frames(true);
        assert_eq!(frames.len(), 9);
        assert_eq!(frames[0].opcode(), 0x10);
        assert_eq!(frames[8].opcode(), 0x18);
        assert!(frames.iter().all(|f| f.param() == 1));
    }

    #[test]
    fn test_parse_led_list() {
        assert_eq!(parse_led_list("1, 3,5").unwrap(), vec![1, 3, 5]);
        assert!(parse_led_list("1,x").is_err());
        assert!(parse_led_list("2,12").is_err());
        assert!(parse_led_list(" , ").is_err());
    }

    #[test]
    fn test_voltage_frames_for_supported_set_points() {
        assert_eq!(voltage_frame(0.1).unwrap().as_bytes(), &[0x09, 0x00, 0x01, 0xFE]);
        assert_eq!(voltage_frame(1.0).unwrap().as_bytes(), &[0x09, 0x00, 0x64, 0xFE]);
        assert_eq!(voltage_frame(10.0).unwrap().as_bytes(), &[0x09, 0x03, 0xE8, 0xFE]);
        assert_eq!(voltage_frame(10.1).unwrap().as_bytes(), &[0x09, 0x03, 0xE9, 0xFE]);
    }

    #[test]
    fn test_voltage_rejects_out_of_range_and_unsupported() {
        let too_high = voltage_frame(12.0).unwrap_err();
        let unsupported = voltage_frame(5.0).unwrap_err();

        assert!(too_high.to_string().contains("out of range"));
        assert!(unsupported.to_string().contains("unsupported"));
        assert!(voltage_frame(-0.5).is_err());
    }

    #[test]
    fn test_waveform_frames() {
        assert_eq!(
            waveform_frame(Waveform::Sine, 1).unwrap().as_bytes(),
            &[0x30, 0x01, 0x01, 0xFE]
        );
        assert_eq!(
            waveform_frame(Waveform::Triangle, 100).unwrap().as_bytes(),
            &[0x30, 0x03, 0x64, 0xFE]
        );
        assert!(waveform_frame(Waveform::Square, 50).is_err());
        assert_eq!("SQUARE".parse::<Waveform>().unwrap(), Waveform::Square);
        assert!("sawtooth".parse::<Waveform>().is_err());
    }
}
