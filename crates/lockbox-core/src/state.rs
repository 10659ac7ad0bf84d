//! Durable client state used by the config service.
//!
//! Records are JSON-encoded and handed to a [`StorageBackend`] as opaque
//! bytes, so the same state layer works over the file and memory backends.

use std::sync::Arc;

use lockbox_storage::StorageBackend;

use crate::error::StateError;
use crate::model::ServerConfigData;

/// Storage key for the last persisted server configuration.
const SERVER_CONFIG_KEY: &str = "global/server_config";

/// Read/write access to the persisted server configuration.
#[async_trait::async_trait]
pub trait ConfigStateStore: Send + Sync + 'static {
    /// The last persisted configuration, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if storage fails or the record is unreadable.
    async fn server_config(&self) -> Result<Option<ServerConfigData>, StateError>;

    /// Overwrite the persisted configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if encoding or the storage write fails.
    async fn set_server_config(&self, data: &ServerConfigData) -> Result<(), StateError>;
}

/// [`ConfigStateStore`] over a key-value [`StorageBackend`].
pub struct StorageStateService {
    storage: Arc<dyn StorageBackend>,
}

impl StorageStateService {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }
}

impl std::fmt::Debug for StorageStateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageStateService").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ConfigStateStore for StorageStateService {
    async fn server_config(&self) -> Result<Option<ServerConfigData>, StateError> {
        let Some(bytes) = self.storage.get(SERVER_CONFIG_KEY).await? else {
            return Ok(None);
        };

        let data = serde_json::from_slice(&bytes).map_err(|e| StateError::Serialization {
            key: SERVER_CONFIG_KEY.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Some(data))
    }

    async fn set_server_config(&self, data: &ServerConfigData) -> Result<(), StateError> {
        let bytes = serde_json::to_vec(data).map_err(|e| StateError::Serialization {
            key: SERVER_CONFIG_KEY.to_owned(),
            reason: e.to_string(),
        })?;
        self.storage.put(SERVER_CONFIG_KEY, &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use lockbox_storage::MemoryBackend;

    use super::*;
    use crate::model::FlagValue;

    fn data(git_hash: &str) -> ServerConfigData {
        ServerConfigData {
            version: "2023.10.0".to_owned(),
            git_hash: git_hash.to_owned(),
            server: None,
            environment: None,
            utc_date: Utc::now(),
            feature_states: BTreeMap::from([("feat1".to_owned(), FlagValue::Bool(true))]),
        }
    }

    #[tokio::test]
    async fn empty_storage_has_no_config() {
        let state = StorageStateService::new(Arc::new(MemoryBackend::new()));
        assert!(state.server_config().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_read_back() {
        let storage = MemoryBackend::new();
        let state = StorageStateService::new(Arc::new(storage.clone()));

        state.set_server_config(&data("first")).await.unwrap();
        state.set_server_config(&data("second")).await.unwrap();

        let stored = state.server_config().await.unwrap().unwrap();
        assert_eq!(stored.git_hash, "second");
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn unreadable_record_is_a_serialization_error() {
        let storage = MemoryBackend::new();
        storage.put(SERVER_CONFIG_KEY, b"{\"broken\"").await.unwrap();

        let state = StorageStateService::new(Arc::new(storage));
        let result = state.server_config().await;
        assert!(matches!(result, Err(StateError::Serialization { .. })));
    }
}
