//! Durable JSON state files.
//!
//! One pretty-printed JSON file per entity family (tracking state, notified
//! keys, inspection data, check history), written last-writer-wins. Saves are
//! atomic: write to a sibling temp file, fsync, rename. A corrupt or missing
//! file yields the default initial state with a warning, never a fatal error.

use std::path::{Path, PathBuf};

use monitor_core::error::{MonitorError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

// ── DataPaths ─────────────────────────────────────────────────────────────────

/// Well-known locations of the persisted state and log files.
#[derive(Debug, Clone)]
pub struct DataPaths {
    /// Directory holding the JSON state files.
    pub data_dir: PathBuf,
    /// Directory holding the log files.
    pub logs_dir: PathBuf,
}

impl DataPaths {
    /// Build the standard layout under `root` (`data/` and `logs/`).
    pub fn under(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            logs_dir: root.join("logs"),
        }
    }

    /// Create both directories if absent.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.logs_dir)?;
        Ok(())
    }

    pub fn tracking_file(&self) -> PathBuf {
        self.data_dir.join("appointment-tracking.json")
    }

    pub fn notified_file(&self) -> PathBuf {
        self.data_dir.join("notified-appointments.json")
    }

    pub fn inspection_file(&self) -> PathBuf {
        self.data_dir.join("inspection-data.json")
    }

    pub fn history_file(&self) -> PathBuf {
        self.data_dir.join("check-history.json")
    }

    pub fn monitor_log(&self) -> PathBuf {
        self.logs_dir.join("monitor.log")
    }

    pub fn notifications_log(&self) -> PathBuf {
        self.logs_dir.join("notifications.log")
    }

    pub fn errors_log(&self) -> PathBuf {
        self.logs_dir.join("errors.log")
    }
}

// ── load / save ───────────────────────────────────────────────────────────────

/// Load `T` from a JSON file.
///
/// Returns `T::default()` with a warning when the file is absent, unreadable
/// or corrupt; the monitor must start regardless of state-file damage.
pub fn load<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "state file is corrupt; starting from empty state"
                );
                T::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "state file unreadable; starting from empty state"
            );
            T::default()
        }
    }
}

/// Atomically write `value` to `path` as pretty JSON.
///
/// The write goes to a sibling `.tmp` file which is fsynced and then renamed
/// over the target, so a process kill mid-write leaves the previous file
/// intact.
pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| MonitorError::FileWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let json = serde_json::to_string_pretty(value)?;

    let tmp = path.with_extension("json.tmp");
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp).map_err(|source| MonitorError::FileWrite {
            path: tmp.clone(),
            source,
        })?;
        file.write_all(json.as_bytes())
            .map_err(|source| MonitorError::FileWrite {
                path: tmp.clone(),
                source,
            })?;
        file.sync_all().map_err(|source| MonitorError::FileWrite {
            path: tmp.clone(),
            source,
        })?;
    }

    std::fs::rename(&tmp, path).map_err(|source| MonitorError::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct State {
        entries: HashMap<String, u32>,
        label: String,
    }

    // ── round trip ────────────────────────────────────────────────────────

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut state = State::default();
        state.entries.insert("a".to_string(), 1);
        state.entries.insert("b".to_string(), 2);
        state.label = "hello".to_string();

        save(&path, &state).unwrap();
        let loaded: State = load(&path);
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("state.json");
        save(&path, &State::default()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        save(&path, &State::default()).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_save_overwrites_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let first = State {
            label: "first".to_string(),
            ..Default::default()
        };
        let second = State {
            label: "second".to_string(),
            ..Default::default()
        };
        save(&path, &first).unwrap();
        save(&path, &second).unwrap();

        let loaded: State = load(&path);
        assert_eq!(loaded.label, "second");
    }

    // ── degraded loads ────────────────────────────────────────────────────

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = TempDir::new().unwrap();
        let loaded: State = load(&dir.path().join("nope.json"));
        assert_eq!(loaded, State::default());
    }

    #[test]
    fn test_load_corrupt_file_returns_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{definitely not json").unwrap();

        let loaded: State = load(&path);
        assert_eq!(loaded, State::default());
    }

    #[test]
    fn test_load_wrong_shape_returns_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"[1, 2, 3]").unwrap();

        let loaded: State = load(&path);
        assert_eq!(loaded, State::default());
    }

    // ── DataPaths ─────────────────────────────────────────────────────────

    #[test]
    fn test_data_paths_layout() {
        let dir = TempDir::new().unwrap();
        let paths = DataPaths::under(dir.path());
        paths.ensure().unwrap();

        assert!(paths.data_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert!(paths
            .tracking_file()
            .ends_with("data/appointment-tracking.json"));
        assert!(paths
            .notified_file()
            .ends_with("data/notified-appointments.json"));
        assert!(paths.monitor_log().ends_with("logs/monitor.log"));
        assert!(paths
            .notifications_log()
            .ends_with("logs/notifications.log"));
        assert!(paths.errors_log().ends_with("logs/errors.log"));
    }
}
