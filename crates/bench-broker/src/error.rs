//! Broker error type.

use thiserror::Error;

/// Failures of the message bus.
///
/// None of these is fatal for a bridge: every variant is handled by dropping
/// the session and reconnecting at the configured retry interval.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached while opening a session.
    #[error("broker unavailable at {endpoint}: {reason}")]
    Unavailable { endpoint: String, reason: String },

    /// An established session dropped.
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),

    /// A message on a channel did not carry exactly one frame.
    #[error("malformed message on '{channel}': {len} bytes")]
    Malformed { channel: String, len: usize },

    /// The channel was shut down locally.
    #[error("channel closed")]
    Closed,
}
