// Local key-value storage for the in-progress wizard form
//
// KeyValueStore lets the form container run against a file store in production and an
// in-memory (or deliberately broken) store in tests.

pub mod file_store;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

pub use file_store::FileStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Storage cannot be opened/read/written (disabled, quota, permissions, bad key file).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Async key-value store scoped to one namespace.
///
/// - `get` on a missing key is `Ok(None)`, never an error.
/// - `set` overwrites unconditionally.
/// - `delete` of a missing key succeeds.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Short name used in log lines.
    fn describe(&self) -> String {
        "kv-store".to_string()
    }
}

/// Process-local store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_basic_contract() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", b"one").await.unwrap();
        store.set("k", b"two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"two".to_vec()));

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.entries.lock().await.is_empty());
    }
}
