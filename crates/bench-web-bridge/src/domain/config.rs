//! Web bridge configuration.
//!
//! [`WebBridgeConfig`] holds every runtime setting of the web bridge.  `main.rs`
//! fills it from CLI arguments and environment variables; tests use
//! [`Default`].  Nothing in here reads the environment itself.

use std::net::SocketAddr;
use std::path::PathBuf;

use bench_broker::BrokerConfig;

/// All runtime configuration for the web bridge.
///
/// # Example
///
/// ```rust
/// use bench_web_bridge::domain::WebBridgeConfig;
///
/// let cfg = WebBridgeConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 8765);
/// assert!(cfg.state_file.is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct WebBridgeConfig {
    /// The address and port the WebSocket server binds to.
    ///
    /// `0.0.0.0` accepts connections from any network interface.  Set to
    /// `127.0.0.1` to accept only local clients.
    pub ws_bind_addr: SocketAddr,

    /// How to reach the message bus.
    pub broker: BrokerConfig,

    /// Where the device state snapshot is kept.  `None` disables persistence.
    pub state_file: Option<PathBuf>,
}

impl Default for WebBridgeConfig {
    /// | Field          | Default         |
    /// |----------------|-----------------|
    /// | ws_bind_addr   | `0.0.0.0:8765`  |
    /// | broker         | `BrokerConfig::default()` |
    /// | state_file     | none            |
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from(([0, 0, 0, 0], 8765)),
            broker: BrokerConfig::default(),
            state_file: None,
        }
    }
}
