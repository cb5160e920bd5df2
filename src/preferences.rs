use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tracing::{debug, warn};

/// Key under which the tracked device models are stored, as a JSON array.
pub const TRACKED_DEVICES_KEY: &str = "monitoringDeviceNames";

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("preference serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// String key-value storage with local-storage semantics: reads never fail,
/// writes may.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError>;
    fn remove(&self, key: &str) -> Result<(), PreferenceError>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        lock(&self.entries).insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// A JSON object on disk, loaded once by `open` and rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Load `path`. A missing file starts empty; so does an unreadable
    /// JSON document, which is logged and overwritten on the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PreferenceError> {
        let path = path.as_ref().to_path_buf();

        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Preference file is not valid JSON; starting empty");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), "Preference store opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the backing file.
    pub fn destroy(self) -> Result<(), PreferenceError> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), PreferenceError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(entries)?)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    /// The in-memory copy only changes once the file has been written.
    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let mut entries = lock(&self.entries);
        let mut updated = entries.clone();
        updated.insert(key.to_owned(), value.to_owned());
        self.flush(&updated)?;
        *entries = updated;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        let mut entries = lock(&self.entries);
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut updated = entries.clone();
        updated.remove(key);
        self.flush(&updated)?;
        *entries = updated;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DevicePreferences
// ---------------------------------------------------------------------------

/// The set of device models the user has chosen to monitor.
#[derive(Debug)]
pub struct DevicePreferences<S> {
    store: S,
}

impl<S: KeyValueStore> DevicePreferences<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// `None` when nothing has been recorded yet. A stored value that does
    /// not parse counts as an empty set.
    pub fn tracked_devices(&self) -> Option<BTreeSet<String>> {
        let raw = self.store.get(TRACKED_DEVICES_KEY)?;
        Some(serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "Stored tracked devices are not valid JSON; ignoring them");
            BTreeSet::new()
        }))
    }

    pub fn is_tracked(&self, device_model: &str) -> bool {
        self.tracked_devices()
            .is_some_and(|devices| devices.contains(device_model))
    }

    /// Add or remove `device_model`. Adding a member or removing a
    /// non-member leaves the stored set untouched.
    pub fn set_tracked(&self, device_model: &str, tracked: bool) -> Result<(), PreferenceError> {
        let mut devices = self.tracked_devices().unwrap_or_default();

        let changed = if tracked {
            devices.insert(device_model.to_owned())
        } else {
            devices.remove(device_model)
        };

        if changed {
            debug!(device_model = %device_model, tracked, "Updating tracked devices");
            self.store
                .set(TRACKED_DEVICES_KEY, &serde_json::to_string(&devices)?)?;
        }
        Ok(())
    }

    /// Forget every tracked device.
    pub fn clear(&self) -> Result<(), PreferenceError> {
        self.store.remove(TRACKED_DEVICES_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "weather_dashboard_{}_{name}.json",
            std::process::id()
        ))
    }

    #[test]
    fn nothing_recorded_is_absent() {
        let prefs = DevicePreferences::new(MemoryStore::new());
        assert!(prefs.tracked_devices().is_none());
        assert!(!prefs.is_tracked("X"));
    }

    #[test]
    fn set_tracked_round_trip() {
        let prefs = DevicePreferences::new(MemoryStore::new());

        prefs.set_tracked("X", true).unwrap();
        assert!(prefs.tracked_devices().unwrap().contains("X"));

        prefs.set_tracked("X", false).unwrap();
        let devices = prefs.tracked_devices().unwrap();
        assert!(!devices.contains("X"));
        assert!(devices.is_empty());
    }

    #[test]
    fn set_tracked_twice_is_idempotent() {
        let prefs = DevicePreferences::new(MemoryStore::new());
        prefs.set_tracked("X", true).unwrap();
        let once = prefs.tracked_devices();
        prefs.set_tracked("X", true).unwrap();
        assert_eq!(prefs.tracked_devices(), once);
    }

    #[test]
    fn removing_non_member_is_noop() {
        let prefs = DevicePreferences::new(MemoryStore::new());
        prefs.set_tracked("Y", false).unwrap();
        assert!(prefs.tracked_devices().is_none());
    }

    #[test]
    fn corrupt_value_reads_as_empty_set() {
        let store = MemoryStore::new();
        store.set(TRACKED_DEVICES_KEY, "{not json").unwrap();
        let prefs = DevicePreferences::new(store);

        assert_eq!(prefs.tracked_devices(), Some(BTreeSet::new()));

        // a write replaces the corrupt value
        prefs.set_tracked("X", true).unwrap();
        assert_eq!(
            prefs.store().get(TRACKED_DEVICES_KEY).as_deref(),
            Some(r#"["X"]"#)
        );
    }

    #[test]
    fn clear_forgets_everything() {
        let prefs = DevicePreferences::new(MemoryStore::new());
        prefs.set_tracked("X", true).unwrap();
        prefs.clear().unwrap();
        assert!(prefs.tracked_devices().is_none());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let path = temp_path("persist");
        let _ = std::fs::remove_file(&path);

        let prefs = DevicePreferences::new(FileStore::open(&path).unwrap());
        prefs.set_tracked("X", true).unwrap();
        prefs.set_tracked("Y", true).unwrap();
        drop(prefs);

        let reopened = DevicePreferences::new(FileStore::open(&path).unwrap());
        let devices = reopened.tracked_devices().unwrap();
        assert_eq!(devices.into_iter().collect::<Vec<_>>(), vec!["X", "Y"]);

        reopened.into_store().destroy().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn failed_write_leaves_preferences_unchanged() {
        let dir = std::env::temp_dir().join(format!(
            "weather_dashboard_{}_unwritable",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let _ = std::fs::remove_file(&dir);

        let prefs = DevicePreferences::new(FileStore::open(dir.join("prefs.json")).unwrap());
        // a plain file where the parent directory should be
        std::fs::write(&dir, b"").unwrap();

        assert!(prefs.set_tracked("X", true).is_err());
        assert!(!prefs.is_tracked("X"));
        assert!(prefs.tracked_devices().is_none());

        // once the directory can be created again the write goes through
        std::fs::remove_file(&dir).unwrap();
        prefs.set_tracked("X", true).unwrap();
        assert!(prefs.is_tracked("X"));

        prefs.into_store().destroy().unwrap();
        std::fs::remove_dir(&dir).unwrap();
    }

    #[test]
    fn file_store_with_corrupt_file_starts_empty() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"]]]").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.get(TRACKED_DEVICES_KEY).is_none());
        store.destroy().unwrap();
    }

    #[test]
    fn destroy_missing_file_is_ok() {
        let store = FileStore::open(temp_path("never_written")).unwrap();
        store.destroy().unwrap();
    }
}
