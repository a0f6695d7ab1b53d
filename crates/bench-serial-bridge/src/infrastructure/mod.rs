//! Infrastructure layer: everything that touches the serial device.

pub mod serial;
