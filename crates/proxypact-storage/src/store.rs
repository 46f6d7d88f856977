//! The async `Storage` trait and the in-memory reference backend.
//!
//! Values are opaque byte strings at the trait level; the typed
//! [`load`](Storage::load)/[`save`](Storage::save) helpers layer JSON
//! on top so callers never touch raw bytes. Loading an absent key is
//! an error ([`ProxypactError::MissingRecord`]) — callers that treat
//! "not yet stored" as normal match on that variant.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use proxypact_types::{ProxypactError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Asynchronous key-value persistence.
///
/// Implementations must make a completed `save_raw` durable with
/// respect to a subsequent `load_raw` of the same key, and `reset`
/// must drop every key. Writes to different keys are independent and
/// may be issued concurrently; ordering of writes to the *same* key is
/// the caller's responsibility (the core serializes them through its
/// event loop).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Deletes everything. Used only for an explicit full reset.
    async fn reset(&self) -> Result<()>;

    /// Loads the raw bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// - [`ProxypactError::MissingRecord`] if the key is absent.
    /// - [`ProxypactError::StorageError`] on backend failure.
    async fn load_raw(&self, key: &str) -> Result<Vec<u8>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn save_raw(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Lists every stored key.
    async fn keys(&self) -> Result<Vec<String>>;
}

impl dyn Storage {
    /// Loads and deserializes the JSON record stored under `key`.
    ///
    /// # Errors
    ///
    /// - [`ProxypactError::MissingRecord`] if the key is absent.
    /// - [`ProxypactError::StorageError`] if the stored bytes do not
    ///   deserialize into `T` (a schema drift or corruption — callers
    ///   treat the record as not-yet-known and let the next handshake
    ///   recreate it).
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let raw = self.load_raw(key).await?;
        serde_json::from_slice(&raw).map_err(|e| ProxypactError::StorageError {
            reason: format!("record under '{key}' failed to deserialize: {e}"),
        })
    }

    /// Serializes `value` as JSON and stores it under `key`.
    pub async fn save<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_vec(value).map_err(|e| ProxypactError::StorageError {
            reason: format!("record for '{key}' failed to serialize: {e}"),
        })?;
        self.save_raw(key, raw).await
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory [`Storage`] backend.
///
/// Used by tests and by callers that want a throwaway profile. The
/// mutex is held only for the duration of one map operation.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries.lock().map_err(|_| ProxypactError::StorageError {
            reason: "memory store mutex poisoned".into(),
        })
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn reset(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    async fn load_raw(&self, key: &str) -> Result<Vec<u8>> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| ProxypactError::MissingRecord { key: key.to_string() })
    }

    async fn save_raw(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn missing_key_is_an_error() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let err = store.load_raw("nope").await.unwrap_err();
        assert!(matches!(err, ProxypactError::MissingRecord { .. }));
    }

    #[tokio::test]
    async fn typed_roundtrip() -> Result<()> {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        store.save("answer", &42u32).await?;
        let loaded: u32 = store.load("answer").await?;
        assert_eq!(loaded, 42);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_record_surfaces_as_storage_error() -> Result<()> {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        store.save_raw("bad", b"not json".to_vec()).await?;
        let err = store.load::<u32>("bad").await.unwrap_err();
        assert!(matches!(err, ProxypactError::StorageError { .. }));
        Ok(())
    }
}
