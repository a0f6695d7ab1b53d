//! TOML file persistence for device state snapshots.
//!
//! The snapshot is small and human-readable:
//!
//! ```toml
//! current_mode = "050004fe"
//! leds_on = [1, 3]
//! ```
//!
//! `current_mode` is the hex of the running mode's open frame and is left
//! out when the device is idle.  A save writes a temporary file next to the
//! target and renames it over the old one, so a crash mid-write never
//! leaves a half-written snapshot behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use bench_core::{DeviceState, Frame, LedSet, StateStore, StoreError, StreamMode};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// On-disk shape of a snapshot.
#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_mode: Option<String>,
    #[serde(default)]
    leds_on: Vec<u8>,
}

impl From<&DeviceState> for Snapshot {
    fn from(state: &DeviceState) -> Self {
        Self {
            current_mode: state.current_mode.map(|mode| mode.open_frame().to_hex()),
            leds_on: state.leds.lit(),
        }
    }
}

impl TryFrom<Snapshot> for DeviceState {
    type Error = StoreError;

    fn try_from(snapshot: Snapshot) -> Result<Self, Self::Error> {
        let current_mode = snapshot
            .current_mode
            .map(|hex| {
                let frame = Frame::from_hex(&hex)
                    .map_err(|e| StoreError::InvalidSnapshot(e.to_string()))?;
                StreamMode::from_open_frame(frame).ok_or_else(|| {
                    StoreError::InvalidSnapshot(format!("{hex} is not a streaming mode open frame"))
                })
            })
            .transpose()?;
        let leds = LedSet::from_lit(&snapshot.leds_on)
            .map_err(|e| StoreError::InvalidSnapshot(e.to_string()))?;
        Ok(DeviceState { current_mode, leds })
    }
}

/// A [`StateStore`] backed by one TOML file.
#[derive(Debug, Clone)]
pub struct TomlStateStore {
    path: PathBuf,
}

impl TomlStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for TomlStateStore {
    /// Returns `Ok(None)` if the file does not exist yet.
    fn load(&self) -> Result<Option<DeviceState>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let snapshot: Snapshot =
            toml::from_str(&content).map_err(|e| StoreError::Parse(e.to_string()))?;
        DeviceState::try_from(snapshot).map(Some)
    }

    fn save(&self, state: &DeviceState) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(&Snapshot::from(state))
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        // Ensure directory exists before writing.
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut file = NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        file.write_all(content.as_bytes())
            .and_then(|()| file.as_file().sync_all())
            .map_err(|e| self.io_error(e))?;
        file.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> TomlStateStore {
        TomlStateStore::new(dir.path().join("state.toml"))
    }

    #[test]
    fn test_load_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_writes_hex_mode_and_led_list() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let state = DeviceState {
            current_mode: Some(StreamMode::MultimeterAcVoltage),
            leds: LedSet::from_lit(&[1, 3]).unwrap(),
        };

        // Act
        store.save(&state).unwrap();

        // Assert
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains(r#"current_mode = "050004fe""#), "{text}");
        assert!(text.contains("leds_on = ["), "{text}");
        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn test_idle_state_omits_current_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.save(&DeviceState::default()).unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(!text.contains("current_mode"), "{text}");
        assert_eq!(store.load().unwrap(), Some(DeviceState::default()));
    }

    #[test]
    fn test_save_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlStateStore::new(dir.path().join("nested").join("state.toml"));

        store.save(&DeviceState::default()).unwrap();

        assert!(store.path().exists());
    }

    #[test]
    fn test_load_garbage_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "current_mode = [[[").unwrap();

        assert!(matches!(store.load(), Err(StoreError::Parse(_))));
    }

    #[test]
    fn test_load_close_frame_as_mode_is_invalid() {
        // Arrange: a close frame is not an open frame of any mode
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "current_mode = \"070000fe\"\n").unwrap();

        // Act
        let result = store.load();

        // Assert
        assert!(matches!(result, Err(StoreError::InvalidSnapshot(_))));
    }

    #[test]
    fn test_load_out_of_range_led_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "leds_on = [2, 10]\n").unwrap();

        assert!(matches!(store.load(), Err(StoreError::InvalidSnapshot(_))));
    }
}
