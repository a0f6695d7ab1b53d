//! bench-web-bridge library crate.
//!
//! The client-facing side of the bench instrument bridge.  Clients connect over
//! WebSocket, send JSON requests ("open the oscilloscope", "read the
//! temperature"), and receive the device's telemetry frames.  Requests become
//! command frames published on the message bus; the serial bridge delivers
//! them to the device.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Client (JSON over WebSocket)
//!         ↕
//! [bench-web-bridge]
//!   ├── domain/           Pure types: JSON message enums, WebBridgeConfig
//!   ├── application/      DeviceService (state tracker + publishing),
//!   │                     TelemetryRelay (purge-on-attach, release on detach)
//!   └── infrastructure/
//!         ├── ws_server/  WebSocket accept loop (tokio-tungstenite)
//!         └── storage/    TOML state snapshots
//!         ↕
//! message bus (bench-broker)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain`, `bench-core` and the `bench-broker`
//!   traits, never on sockets or files.
//! - `infrastructure` depends on all other layers plus `tokio-tungstenite`
//!   and the file system.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: device control and telemetry relaying.
pub mod application;

/// Infrastructure layer: WebSocket server and snapshot storage.
pub mod infrastructure;
