use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};

use super::{LocalStorage, StorageError};

/// `LocalStorage` backed by one JSON object file mapping keys to raw strings.
///
/// Reads always refresh from disk. Writes re-read the on-disk object and only
/// replace the key being written, so two handles on the same file only
/// clobber each other when they touch the same key.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_strict(&self) -> Result<Map<String, Value>, StorageError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(StorageError::Malformed {
                path: self.path.clone(),
            }),
        }
    }

    fn read_for_write(&self) -> Result<Map<String, Value>, StorageError> {
        match self.read_strict() {
            Ok(map) => Ok(map),
            Err(StorageError::Malformed { path }) => {
                let backup = backup_path(&path);
                tracing::warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    "storage file unreadable; moving it aside and starting fresh"
                );
                std::fs::rename(&path, &backup).map_err(|source| StorageError::Io {
                    path: path.clone(),
                    source,
                })?;
                Ok(Map::new())
            }
            Err(err) => Err(err),
        }
    }

    fn mutate(&self, apply: impl FnOnce(&mut Map<String, Value>)) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut on_disk = self.read_for_write()?;
        apply(&mut on_disk);
        write_json_object(&self.path, &on_disk)
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let payload = self.read_strict()?;
        Ok(payload.get(key).map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.mutate(|payload| {
            payload.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.mutate(|payload| {
            payload.remove(key);
        })
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.read_strict()?.keys().cloned().collect())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|value| value.to_os_string())
        .unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let text = serde_json::to_string_pretty(&Value::Object(payload.clone()))?;
    std::fs::write(path, text).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use crate::storage::{LocalStorage, StorageError};

    use super::FileStorage;

    #[test]
    fn file_storage_basic() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let storage = FileStorage::new(temp.path().join("storage.json"));
        assert_eq!(storage.get_item("key")?, None);

        storage.set_item("key", "[]")?;
        assert_eq!(storage.get_item("key")?.as_deref(), Some("[]"));
        Ok(())
    }

    #[test]
    fn writes_merge_with_another_handle() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        let storage_a = FileStorage::new(&path);
        let storage_b = FileStorage::new(&path);

        storage_a.set_item("a", "1")?;
        storage_b.set_item("b", "2")?;
        storage_a.set_item("c", "3")?;

        let reloaded = FileStorage::new(path);
        assert_eq!(reloaded.get_item("a")?.as_deref(), Some("1"));
        assert_eq!(reloaded.get_item("b")?.as_deref(), Some("2"));
        assert_eq!(reloaded.get_item("c")?.as_deref(), Some("3"));
        Ok(())
    }

    #[test]
    fn same_key_is_last_write_wins() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        let storage_a = FileStorage::new(&path);
        let storage_b = FileStorage::new(&path);

        storage_a.set_item("key", "from-a")?;
        storage_b.set_item("key", "from-b")?;
        assert_eq!(storage_a.get_item("key")?.as_deref(), Some("from-b"));
        Ok(())
    }

    #[test]
    fn remove_item_drops_only_that_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let storage = FileStorage::new(temp.path().join("storage.json"));
        storage.set_item("keep", "1")?;
        storage.set_item("drop", "2")?;
        storage.remove_item("drop")?;
        assert_eq!(storage.keys()?, vec!["keep".to_string()]);
        Ok(())
    }

    #[test]
    fn malformed_file_errors_on_read_and_is_moved_aside_on_write() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        std::fs::write(&path, "{not json")?;
        let storage = FileStorage::new(&path);

        assert!(matches!(
            storage.get_item("key"),
            Err(StorageError::Malformed { .. })
        ));

        storage.set_item("key", "[]")?;
        assert_eq!(storage.get_item("key")?.as_deref(), Some("[]"));
        assert_eq!(
            std::fs::read_to_string(temp.path().join("storage.json.corrupt"))?,
            "{not json"
        );
        Ok(())
    }
}
