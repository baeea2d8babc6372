//! JSON save files with atomic writes.
//!
//! Each save is a directory under the configured saves root holding a
//! human-readable `world.json` plus the co-located `events.sqlite`
//! event log. Writes go through a temp file and rename so a crash
//! mid-save never corrupts an existing file. Save names are restricted
//! to a safe character set; anything else is rejected before touching
//! the filesystem.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::DbError;

/// File name of the world snapshot inside a save directory.
const WORLD_FILE: &str = "world.json";

/// File name of the event log inside a save directory.
const EVENTS_FILE: &str = "events.sqlite";

/// Manages the saves directory.
pub struct SaveStore {
    root: PathBuf,
}

impl SaveStore {
    /// Create a store rooted at `root` (created on first write).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory for one save.
    pub fn save_dir(&self, name: &str) -> Result<PathBuf, DbError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Path of a save's event database.
    pub fn events_db_path(&self, name: &str) -> Result<PathBuf, DbError> {
        Ok(self.save_dir(name)?.join(EVENTS_FILE))
    }

    /// Serialize `value` into the save's `world.json`, atomically.
    pub fn write_world<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, DbError> {
        let dir = self.save_dir(name)?;
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(WORLD_FILE);
        let tmp = dir.join(format!("{WORLD_FILE}.tmp"));
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, json.as_bytes())?;
        std::fs::rename(&tmp, &path)?;
        info!(save = name, path = %path.display(), "world saved");
        Ok(path)
    }

    /// Read and deserialize a save's `world.json`.
    pub fn read_world<T: DeserializeOwned>(&self, name: &str) -> Result<T, DbError> {
        let path = self.save_dir(name)?.join(WORLD_FILE);
        if !path.exists() {
            return Err(DbError::NoSuchSave(name.to_owned()));
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Delete a save directory and everything in it.
    pub fn delete(&self, name: &str) -> Result<(), DbError> {
        let dir = self.save_dir(name)?;
        if !dir.exists() {
            return Err(DbError::NoSuchSave(name.to_owned()));
        }
        std::fs::remove_dir_all(&dir)?;
        info!(save = name, "save deleted");
        Ok(())
    }

    /// List saves that contain a world file, sorted by name.
    pub fn list(&self) -> Result<Vec<String>, DbError> {
        let mut names = Vec::new();
        if !self.root.exists() {
            return Ok(names);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().join(WORLD_FILE).exists() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Reject names that could escape the saves root.
fn validate_name(name: &str) -> Result<(), DbError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(DbError::InvalidName(name.to_owned()))
    }
}

/// Whether a path points at an existing world file (convenience for
/// callers probing a save).
pub fn world_exists(dir: &Path) -> bool {
    dir.join(WORLD_FILE).exists()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn store() -> SaveStore {
        let root = std::env::temp_dir().join(format!(
            "xiuxian_saves_{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&root);
        SaveStore::new(root)
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Snapshot {
        version: u32,
        stamp: u64,
    }

    #[test]
    fn write_read_roundtrip() {
        let store = store();
        let snapshot = Snapshot { version: 1, stamp: 1234 };
        store.write_world("alpha", &snapshot).unwrap();
        let back: Snapshot = store.read_world("alpha").unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn list_only_counts_real_saves() {
        let store = store();
        store.write_world("beta", &Snapshot { version: 1, stamp: 1 }).unwrap();
        store.write_world("alpha", &Snapshot { version: 1, stamp: 2 }).unwrap();
        // A stray directory without a world file is not a save.
        std::fs::create_dir_all(store.save_dir("stray").unwrap()).unwrap();

        assert_eq!(store.list().unwrap(), vec!["alpha".to_owned(), "beta".to_owned()]);
    }

    #[test]
    fn delete_removes_the_save() {
        let store = store();
        store.write_world("gone", &Snapshot { version: 1, stamp: 1 }).unwrap();
        store.delete("gone").unwrap();
        assert!(matches!(
            store.read_world::<Snapshot>("gone"),
            Err(DbError::NoSuchSave(_))
        ));
        assert!(matches!(store.delete("gone"), Err(DbError::NoSuchSave(_))));
    }

    #[test]
    fn hostile_names_are_rejected() {
        let store = store();
        for name in ["../escape", "a/b", "", "name with spaces", "x".repeat(65).as_str()] {
            assert!(matches!(
                store.write_world(name, &Snapshot { version: 1, stamp: 0 }),
                Err(DbError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn events_path_sits_beside_the_world_file() {
        let store = store();
        let path = store.events_db_path("alpha").unwrap();
        assert!(path.ends_with("alpha/events.sqlite"));
    }
}
