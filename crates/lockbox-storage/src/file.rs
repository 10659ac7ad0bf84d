//! JSON-file storage backend.
//!
//! The whole store is one JSON object mapping keys to base64-encoded values,
//! the same shape a browser's local storage area has. The file is read once,
//! lazily, on first access and rewritten on every mutation.
//!
//! # Durability
//!
//! Writes go to a sibling `*.tmp` file which is then renamed over the real
//! one, so a crash mid-write leaves the previous document intact. The
//! in-memory copy is only updated after the rename succeeds.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::{StorageBackend, StorageError};

type Entries = BTreeMap<String, Vec<u8>>;

/// A storage backend persisted as a single JSON document.
pub struct FileBackend {
    path: PathBuf,
    /// `None` until the file has been loaded.
    entries: Mutex<Option<Entries>>,
}

impl FileBackend {
    /// Create a backend for the document at `path`.
    ///
    /// Nothing is touched on disk until the first operation. A missing file
    /// is treated as an empty store; parent directories are created on the
    /// first write.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: Mutex::new(None),
        }
    }

    /// Return the filesystem path of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn loaded(&self) -> Result<MutexGuard<'_, Option<Entries>>, StorageError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_document().await?);
        }
        Ok(guard)
    }

    async fn read_document(&self) -> Result<Entries, StorageError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "storage file missing, starting empty");
                return Ok(Entries::new());
            }
            Err(e) => {
                return Err(StorageError::Open {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let encoded: BTreeMap<String, String> =
            serde_json::from_str(&text).map_err(|e| self.corrupt(e.to_string()))?;

        encoded
            .into_iter()
            .map(|(key, value)| {
                BASE64
                    .decode(value.as_bytes())
                    .map(|bytes| (key.clone(), bytes))
                    .map_err(|e| self.corrupt(format!("value for '{key}' is not base64: {e}")))
            })
            .collect()
    }

    async fn write_document(&self, entries: &Entries, key: &str) -> Result<(), StorageError> {
        let write_err = |reason: String| StorageError::Write {
            key: key.to_owned(),
            reason,
        };

        let encoded: BTreeMap<&str, String> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), BASE64.encode(v)))
            .collect();
        let body = serde_json::to_vec_pretty(&encoded).map_err(|e| write_err(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                write_err(format!("failed to create '{}': {e}", parent.display()))
            })?;
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| write_err(format!("failed to write '{}': {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| write_err(format!("failed to replace '{}': {e}", self.path.display())))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn corrupt(&self, reason: String) -> StorageError {
        StorageError::Corrupt {
            path: self.path.display().to_string(),
            reason,
        }
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let guard = self.loaded().await?;
        Ok(guard.as_ref().and_then(|entries| entries.get(key).cloned()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut guard = self.loaded().await?;
        let mut next = guard.clone().unwrap_or_default();
        next.insert(key.to_owned(), value.to_vec());

        self.write_document(&next, key).await?;
        *guard = Some(next);
        Ok(())
    }
}
