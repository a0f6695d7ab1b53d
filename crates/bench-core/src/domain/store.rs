//! Persistence seam for [`DeviceState`] snapshots.
//!
//! The web bridge writes a snapshot after every accepted mutation and loads it
//! at startup, so a restarted process still knows which streaming mode it
//! left running.  The file format lives in the infrastructure layer; the
//! domain only defines the trait.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::device_state::DeviceState;

/// Error type for snapshot persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing snapshot at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored snapshot could not be parsed.
    #[error("failed to parse snapshot: {0}")]
    Parse(String),

    /// The snapshot could not be serialized.
    #[error("failed to serialize snapshot: {0}")]
    Serialize(String),

    /// The snapshot parsed but names an unknown mode or LED.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Loads and saves device state snapshots.
pub trait StateStore: Send + Sync {
    /// Returns the last saved state, or `Ok(None)` if nothing was saved yet.
    fn load(&self) -> Result<Option<DeviceState>, StoreError>;

    /// Persists `state`, replacing any previous snapshot.
    fn save(&self, state: &DeviceState) -> Result<(), StoreError>;
}

/// A store that keeps nothing.  Used when no snapshot file is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

impl StateStore for NoopStore {
    fn load(&self) -> Result<Option<DeviceState>, StoreError> {
        Ok(None)
    }

    fn save(&self, _state: &DeviceState) -> Result<(), StoreError> {
        Ok(())
    }
}
