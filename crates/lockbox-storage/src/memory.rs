//! In-memory storage backend.
//!
//! Nothing survives the process. Used by tests and by agents started with
//! `LOCKBOX_STORAGE=memory`, where persisting server state is unwanted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// An in-memory storage backend backed by a `HashMap`.
///
/// Clones share the same underlying map, so a test can keep a handle and
/// inspect what a component wrote.
///
/// # Examples
///
/// ```
/// # use lockbox_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() -> Result<(), lockbox_storage::StorageError> {
/// let backend = MemoryBackend::new();
/// backend.put("global/server_config", b"{}").await?;
/// let val = backend.get("global/server_config").await?;
/// assert_eq!(val, Some(b"{}".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the backend holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.data
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }
}
