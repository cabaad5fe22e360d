//! Key/value persistence with browser `localStorage` semantics: string values,
//! synchronous access, last write wins per key.

mod file;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

pub use file::FileStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage file {path} is not a JSON object")]
    Malformed { path: PathBuf },
    #[error("storage encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

impl<S: LocalStorage + ?Sized> LocalStorage for Arc<S> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove_item(key)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        (**self).keys()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.items().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{LocalStorage, MemoryStorage};

    #[test]
    fn memory_storage_basic() -> anyhow::Result<()> {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_item("missing")?, None);

        storage.set_item("key", "[1,2]")?;
        assert_eq!(storage.get_item("key")?.as_deref(), Some("[1,2]"));

        storage.remove_item("key")?;
        assert_eq!(storage.get_item("key")?, None);
        assert!(storage.keys()?.is_empty());
        Ok(())
    }

    #[test]
    fn shared_handles_see_each_other() -> anyhow::Result<()> {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let other = Arc::clone(&storage);
        storage.set_item("key", "value")?;
        assert_eq!(other.get_item("key")?.as_deref(), Some("value"));
        Ok(())
    }
}
