use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

/// Durable slot for the serialized holding sequence. Whole-blob read and
/// whole-blob overwrite only, no partial updates.
pub trait Storage {
    /// Returns `None` when no prior state exists.
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, blob: &str) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Storage for JsonFileStorage {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).context(format!("Failed to read {}", self.path.display()))
            }
        }
    }

    fn save(&self, blob: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create {}", parent.display()))?;
            }
        }
        fs::write(&self.path, blob).context(format!("Failed to write {}", self.path.display()))
    }
}

/// In-memory stand-in used by tests. Clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    blob: Arc<Mutex<Option<String>>>,
}

impl Storage for MemoryStorage {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.blob.lock().unwrap().clone())
    }

    fn save(&self, blob: &str) -> Result<()> {
        *self.blob.lock().unwrap() = Some(blob.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("portfolio.json"));

        assert!(storage.load().unwrap().is_none());

        storage.save(r#"[{"coinId":"bitcoin"}]"#).unwrap();
        assert_eq!(
            storage.load().unwrap().as_deref(),
            Some(r#"[{"coinId":"bitcoin"}]"#)
        );
    }

    #[test]
    fn test_file_storage_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("nested/portfolio.json"));
        storage.save("[]").unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_memory_storage_shares_slot_between_clones() {
        let storage = MemoryStorage::default();
        let other = storage.clone();
        storage.save("[]").unwrap();
        assert_eq!(other.load().unwrap().as_deref(), Some("[]"));
    }
}
