//! Infrastructure layer for bench-web-bridge.
//!
//! All I/O lives here: the WebSocket accept loop and the TOML snapshot file.
//! Request handling and relaying are delegated to the application layer.

pub mod storage;
pub mod ws_server;

pub use storage::TomlStateStore;
pub use ws_server::{run_server, serve};
