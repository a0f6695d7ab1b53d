//! Device state: the single active streaming mode and the LED set.
//!
//! The serial protocol is fire-and-forget: the device never acknowledges a
//! command, so software cannot observe which mode is really running.  The
//! tracker therefore treats *acceptance* of a request as the state-changing
//! event.  When a request is accepted the tracker updates its state and
//! returns the exact frames that must be sent, in order.
//!
//! # State machine
//!
//! ```text
//!          open(m)                 open(m')  (emits close(m), open(m'))
//!   None ──────────▶ m ──────────────────────────────────▶ m'
//!    ▲               │ open(m)   (emits open(m) only)
//!    │    close      │ one-shot  (emits read, open(m))
//!    └───────────────┘
//! ```
//!
//! One-shot reads are not states: they are transient frame sequences that
//! leave `current_mode` untouched.
//!
//! # Concurrency
//!
//! `DeviceStateTracker` is a plain single-owner value.  Callers that share it
//! between concurrent requests wrap it in a mutex and keep the lock held until
//! the returned frames are published, so two requests can never interleave
//! their frames.

use crate::protocol::codec::Frame;
use crate::protocol::commands::{self, CommandError, DeviceFamily, StreamMode, LED_COUNT};

// ── LED set ──────────────────────────────────────────────────────────────────

/// On/off state of LEDs 1..=9.  Independent of the streaming mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedSet {
    on: [bool; LED_COUNT as usize],
}

impl LedSet {
    /// Returns whether LED `id` is on.  Ids outside 1..=9 are reported off.
    pub fn is_on(&self, id: u8) -> bool {
        Self::index(id).map(|i| self.on[i]).unwrap_or(false)
    }

    /// Records LED `id` as on or off.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidParameter`] for ids outside 1..=9.
    pub fn set(&mut self, id: u8, on: bool) -> Result<(), CommandError> {
        let index = Self::index(id).ok_or_else(|| {
            CommandError::InvalidParameter(format!("LED id {id} out of range 1..={LED_COUNT}"))
        })?;
        self.on[index] = on;
        Ok(())
    }

    pub fn set_all(&mut self, on: bool) {
        self.on = [on; LED_COUNT as usize];
    }

    /// Ids of the LEDs that are on, ascending.
    pub fn lit(&self) -> Vec<u8> {
        (1..=LED_COUNT).filter(|id| self.is_on(*id)).collect()
    }

    /// Builds a set with exactly the given LEDs on.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidParameter`] if any id is outside 1..=9.
    pub fn from_lit(ids: &[u8]) -> Result<Self, CommandError> {
        let mut set = Self::default();
        for id in ids {
            set.set(*id, true)?;
        }
        Ok(set)
    }

    fn index(id: u8) -> Option<usize> {
        (1..=LED_COUNT).contains(&id).then(|| usize::from(id - 1))
    }
}

// ── Device state ─────────────────────────────────────────────────────────────

/// Everything the bridge believes about the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// The running streaming mode, or `None` when the device is idle.
    pub current_mode: Option<StreamMode>,
    /// The latest LED on/off set.
    pub leds: LedSet,
}

/// Frames needed to move the device into a requested streaming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSwitch {
    /// Close frame for the previously running mode, if a *different* mode was running.
    pub close_frame: Option<Frame>,
    /// Open frame of the requested mode.  Always present.
    pub open_frame: Frame,
}

impl ModeSwitch {
    /// The frames in the order they must be written.
    pub fn frames(&self) -> Vec<Frame> {
        self.close_frame.into_iter().chain([self.open_frame]).collect()
    }
}

// ── Tracker ──────────────────────────────────────────────────────────────────

/// Holds the [`DeviceState`] and decides which frames each request needs.
#[derive(Debug, Clone, Default)]
pub struct DeviceStateTracker {
    state: DeviceState,
}

impl DeviceStateTracker {
    /// Starts with no mode running and every LED off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a previously persisted state.
    pub fn with_state(state: DeviceState) -> Self {
        Self { state }
    }

    pub fn current_mode(&self) -> Option<StreamMode> {
        self.state.current_mode
    }

    /// Accepts a request to run `target` and returns the frames to send.
    ///
    /// - Same mode already running: only the open frame is re-issued (no close,
    ///   so a repeated click does not interrupt the stream).
    /// - A different mode running: its close frame, then the open frame.
    /// - Idle: only the open frame.
    ///
    /// `current_mode` becomes `target` in every case.
    pub fn request_mode_switch(&mut self, target: StreamMode) -> ModeSwitch {
        let close_frame = match self.state.current_mode {
            Some(active) if active != target => Some(active.close_frame()),
            _ => None,
        };
        self.state.current_mode = Some(target);
        ModeSwitch {
            close_frame,
            open_frame: target.open_frame(),
        }
    }

    /// Accepts a request to stop streaming.
    ///
    /// Returns the close frame of the running mode, or `None` when the device
    /// is already idle (nothing needs to be sent).  `current_mode` becomes `None`.
    pub fn request_close(&mut self) -> Option<Frame> {
        self.state.current_mode.take().map(StreamMode::close_frame)
    }

    /// Closes one instrument family explicitly.
    ///
    /// The family's close frame is always returned (the device tolerates a
    /// redundant close).  `current_mode` is cleared only if the running mode
    /// belongs to `family`.
    pub fn close_family(&mut self, family: DeviceFamily) -> Frame {
        if self.state.current_mode.map(StreamMode::family) == Some(family) {
            self.state.current_mode = None;
        }
        family.close_frame()
    }

    /// Wraps a one-shot read so the interrupted stream is restored.
    ///
    /// A one-shot read displaces the device's continuous output, and the device
    /// never resumes on its own, so the open frame of the running mode is sent
    /// again right after the read.  `current_mode` is unchanged.
    pub fn one_shot_wrap(&self, read_frame: Frame) -> Vec<Frame> {
        std::iter::once(read_frame)
            .chain(self.state.current_mode.map(StreamMode::open_frame))
            .collect()
    }

    /// Accepts an LED change and returns its frame.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidParameter`] for ids outside 1..=9; the
    /// state is untouched in that case.
    pub fn set_led(&mut self, id: u8, on: bool) -> Result<Frame, CommandError> {
        let frame = commands::led_frame(id, on)?;
        self.state.leds.set(id, on)?;
        Ok(frame)
    }

    /// Accepts a change to every LED and returns the nine frames.
    pub fn set_all_leds(&mut self, on: bool) -> Vec<Frame> {
        self.state.leds.set_all(on);
        commands::all_led_frames(on)
    }

    /// A copy of the current state, for status queries and persistence.
    pub fn snapshot(&self) -> DeviceState {
        self.state.clone()
    }

    /// Replaces the current state (crash/restart recovery).
    pub fn restore(&mut self, state: DeviceState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::{Sensor, CLOSE_MULTIMETER, CLOSE_OSCILLOSCOPE};

    #[test]
    fn test_open_from_idle_emits_only_open_frame() {
        // Arrange
        let mut tracker = DeviceStateTracker::new();

        // Act
        let switch = tracker.request_mode_switch(StreamMode::Oscilloscope);

        // Assert
        assert_eq!(switch.close_frame, None);
        assert_eq!(switch.open_frame, StreamMode::Oscilloscope.open_frame());
        assert_eq!(tracker.current_mode(), Some(StreamMode::Oscilloscope));
    }

    #[test]
    fn test_switch_between_modes_closes_previous_first() {
        // Arrange: oscilloscope running
        let mut tracker = DeviceStateTracker::new();
        tracker.request_mode_switch(StreamMode::Oscilloscope);

        // Act
        let frames = tracker.request_mode_switch(StreamMode::MultimeterResistance).frames();

        // Assert
        assert_eq!(
            frames,
            vec![CLOSE_OSCILLOSCOPE, StreamMode::MultimeterResistance.open_frame()]
        );
        assert_eq!(tracker.current_mode(), Some(StreamMode::MultimeterResistance));
    }

    #[test]
    fn test_switch_between_multimeter_sub_modes_closes_multimeter() {
        let mut tracker = DeviceStateTracker::new();
        tracker.request_mode_switch(StreamMode::MultimeterDcVoltage);

        let switch = tracker.request_mode_switch(StreamMode::MultimeterAcVoltage);

        assert_eq!(switch.close_frame, Some(CLOSE_MULTIMETER));
    }

    #[test]
    fn test_repeated_open_skips_close_but_resends_open() {
        let mut tracker = DeviceStateTracker::new();
        tracker.request_mode_switch(StreamMode::MultimeterContinuity);

        let again = tracker.request_mode_switch(StreamMode::MultimeterContinuity);

        assert_eq!(again.frames(), vec![StreamMode::MultimeterContinuity.open_frame()]);
        assert_eq!(tracker.current_mode(), Some(StreamMode::MultimeterContinuity));
    }

    #[test]
    fn test_request_close_returns_matching_close_frame() {
        let mut tracker = DeviceStateTracker::new();
        tracker.request_mode_switch(StreamMode::MultimeterDcCurrent);

        assert_eq!(tracker.request_close(), Some(CLOSE_MULTIMETER));
        assert_eq!(tracker.current_mode(), None);
        assert_eq!(tracker.request_close(), None, "closing idle device sends nothing");
    }

    #[test]
    fn test_close_family_only_clears_matching_mode() {
        // Arrange: multimeter running
        let mut tracker = DeviceStateTracker::new();
        tracker.request_mode_switch(StreamMode::MultimeterResistance);

        // Act: close the oscilloscope, which is not running
        let frame = tracker.close_family(DeviceFamily::Oscilloscope);

        // Assert
        assert_eq!(frame, CLOSE_OSCILLOSCOPE);
        assert_eq!(tracker.current_mode(), Some(StreamMode::MultimeterResistance));

        let frame = tracker.close_family(DeviceFamily::Multimeter);
        assert_eq!(frame, CLOSE_MULTIMETER);
        assert_eq!(tracker.current_mode(), None);
    }

    #[test]
    fn test_one_shot_wrap_when_idle() {
        let tracker = DeviceStateTracker::new();
        let read = Sensor::Temperature.read_frame();
        assert_eq!(tracker.one_shot_wrap(read), vec![read]);
    }

    #[test]
    fn test_one_shot_wrap_restores_running_mode() {
        let mut tracker = DeviceStateTracker::new();
        tracker.request_mode_switch(StreamMode::MultimeterAcVoltage);
        let read = Sensor::Distance.read_frame();

        let frames = tracker.one_shot_wrap(read);

        assert_eq!(frames, vec![read, StreamMode::MultimeterAcVoltage.open_frame()]);
        assert_eq!(tracker.current_mode(), Some(StreamMode::MultimeterAcVoltage));
    }

    #[test]
    fn test_set_led_is_independent_of_mode() {
        let mut tracker = DeviceStateTracker::new();
        tracker.request_mode_switch(StreamMode::Oscilloscope);

        let frame = tracker.set_led(4, true).unwrap();

        assert_eq!(frame.as_bytes(), &[0x13, 0x00, 0x01, 0xFE]);
        assert_eq!(tracker.current_mode(), Some(StreamMode::Oscilloscope));
        assert_eq!(tracker.snapshot().leds.lit(), vec![4]);
    }

    #[test]
    fn test_set_led_invalid_id_leaves_state_untouched() {
        let mut tracker = DeviceStateTracker::new();
        let before = tracker.snapshot();

        assert!(tracker.set_led(0, true).is_err());
        assert_eq!(tracker.snapshot(), before);
    }

    #[test]
    fn test_set_all_leds() {
        let mut tracker = DeviceStateTracker::new();
        let frames = tracker.set_all_leds(true);
        assert_eq!(frames.len(), 9);
        assert_eq!(tracker.snapshot().leds.lit(), (1..=9).collect::<Vec<u8>>());

        tracker.set_all_leds(false);
        assert!(tracker.snapshot().leds.lit().is_empty());
    }

    #[test]
    fn test_snapshot_and_restore() {
        // Arrange
        let mut original = DeviceStateTracker::new();
        original.request_mode_switch(StreamMode::MultimeterDcVoltage);
        original.set_led(2, true).unwrap();

        // Act
        let mut restored = DeviceStateTracker::new();
        restored.restore(original.snapshot());

        // Assert
        assert_eq!(restored.snapshot(), original.snapshot());
        assert_eq!(
            restored.request_mode_switch(StreamMode::Oscilloscope).close_frame,
            Some(CLOSE_MULTIMETER)
        );
    }

    #[test]
    fn test_led_set_from_lit_rejects_bad_ids() {
        assert_eq!(LedSet::from_lit(&[1, 9]).unwrap().lit(), vec![1, 9]);
        assert!(LedSet::from_lit(&[3, 11]).is_err());
        assert!(!LedSet::default().is_on(42));
    }
}
