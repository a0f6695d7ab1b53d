//! Application layer: the two bridge loops.
//!
//! Neither loop touches a socket or a serial port directly.  The command
//! bridge writes through the [`FrameWriter`] trait and both open broker
//! sessions through `bench_broker::Broker`, so every path, including
//! reconnects, runs in tests without hardware or a broker.

pub mod command_bridge;
pub mod telemetry_bridge;

pub use command_bridge::{CommandBridge, FrameWriter};
pub use telemetry_bridge::TelemetryBridge;
