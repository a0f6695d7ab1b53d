//! # bench-serial-bridge
//!
//! Owns the instrument's serial port and relays frames between it and the
//! message bus.
//!
//! # Architecture overview (for beginners)
//!
//! ```text
//!  command channel ──▶ CommandBridge ──▶ SerialHandle ─┐
//!                                                      ▼
//!                                          serial worker thread ◀──▶ /dev/ttyACM0
//!                                                      │
//!  telemetry channel ◀── TelemetryBridge ◀── TelemetryQueue(50)
//! ```
//!
//! - **`domain`**: the bridge configuration.
//! - **`application`**: the two bridge loops.  They depend only on traits
//!   (`Broker` from `bench-broker`, [`application::FrameWriter`]), so tests
//!   drive them with an in-process broker and a recording writer.
//! - **`infrastructure`**: the serial port, its mock, and the worker thread
//!   that is the port's single owner.  Writes, post-close input discards and
//!   reads all happen on that thread, one at a time, so a discard can never
//!   race a read in progress.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use infrastructure::serial::SerialError;
