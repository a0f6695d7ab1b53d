//! # bench-core
//!
//! Shared library for the bench instrument bridge containing the 4-byte serial
//! frame codec, the device command catalog, and the device state tracker.
//!
//! This crate is used by both the serial bridge and the web bridge.
//! It has zero dependencies on OS APIs, serial ports, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! The instrument (LEDs, oscilloscope, multimeter, signal generator and a few
//! sensors) sits on the far end of a 9600 baud serial link.  It understands
//! exactly one kind of message: a 4-byte *frame*
//! `[opcode, param_hi, param_lo, 0xFE]`.  Clients never talk to the serial
//! port directly; they publish frames onto a message bus, and the serial
//! bridge relays them to the device.
//!
//! This crate (`bench-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** : How bytes travel over the serial link.  [`Frame`] is the
//!   immutable 4-byte unit, [`decode_frame`] extracts frames from a receive
//!   buffer, and the `commands` module builds every valid command frame
//!   (rejecting unsupported parameters before a frame exists).
//!
//! - **`domain`** : Pure business logic with no I/O.  The most important
//!   piece is the [`DeviceStateTracker`]: it remembers which streaming mode is
//!   running and decides which close/open/restore frames a request needs.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `bench_core::Frame` instead of `bench_core::protocol::codec::Frame`.
pub use domain::bounded_queue::BoundedQueue;
pub use domain::device_state::{DeviceState, DeviceStateTracker, LedSet, ModeSwitch};
pub use domain::store::{NoopStore, StateStore, StoreError};
pub use protocol::codec::{decode_frame, Frame, FrameError, FRAME_LEN, FRAME_TERMINATOR};
pub use protocol::commands::{CommandError, DeviceFamily, Sensor, StreamMode, Waveform};
