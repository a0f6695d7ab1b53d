//! Application layer for bench-web-bridge.
//!
//! Knows *what* to do with a client: turn its requests into command frames
//! ([`device_service`]) and feed it telemetry ([`relay`]).  It never touches
//! a socket; the infrastructure layer hands it decoded requests and a
//! [`FrameSink`] to write to.

pub mod device_service;
pub mod relay;

pub use device_service::{DeviceService, ServiceError};
pub use relay::{ClientGone, FrameSink, RelayEnd, TelemetryRelay};
