//! Domain layer for bench-web-bridge.
//!
//! Pure types with no I/O: the JSON messages exchanged with clients and the
//! bridge configuration.

pub mod config;
pub mod messages;

pub use config::WebBridgeConfig;
pub use messages::{ButtonState, ClientRequest, ServerMessage, StatusView};
