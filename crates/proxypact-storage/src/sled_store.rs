//! Sled-backed [`Storage`] implementation.
//!
//! One sled database, default tree, JSON values. Sled's own operations
//! are synchronous and fast; they are invoked inline from the async
//! trait methods. An explicit flush is performed on `reset` so a wiped
//! profile cannot resurrect after a crash.

use std::path::Path;

use async_trait::async_trait;
use proxypact_types::{ProxypactError, Result};

use crate::store::Storage;

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// On-disk key-value store backed by sled.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Opens (or creates) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxypactError::StorageError`] if the database cannot
    /// be opened (typically: the directory is locked by another
    /// process or not writable).
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| ProxypactError::StorageError {
            reason: format!("failed to open sled database: {e}"),
        })?;
        Ok(Self { db })
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|e| ProxypactError::StorageError {
            reason: format!("failed to flush database: {e}"),
        })?;
        Ok(())
    }
}

#[async_trait]
impl Storage for SledStore {
    async fn reset(&self) -> Result<()> {
        self.db.clear().map_err(|e| ProxypactError::StorageError {
            reason: format!("failed to clear database: {e}"),
        })?;
        self.flush()
    }

    async fn load_raw(&self, key: &str) -> Result<Vec<u8>> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| ProxypactError::StorageError {
                reason: format!("failed to read key '{key}': {e}"),
            })?;
        match value {
            Some(ivec) => Ok(ivec.to_vec()),
            None => Err(ProxypactError::MissingRecord { key: key.to_string() }),
        }
    }

    async fn save_raw(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| ProxypactError::StorageError {
                reason: format!("failed to write key '{key}': {e}"),
            })?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in self.db.iter() {
            let (key, _) = entry.map_err(|e| ProxypactError::StorageError {
                reason: format!("failed to iterate keys: {e}"),
            })?;
            match std::str::from_utf8(&key) {
                Ok(s) => keys.push(s.to_string()),
                Err(_) => {
                    tracing::warn!("skipping non-utf8 storage key");
                }
            }
        }
        Ok(keys)
    }
}
