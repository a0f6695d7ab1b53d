//! Domain layer: configuration of the serial bridge.

pub mod config;

pub use config::SerialBridgeConfig;
