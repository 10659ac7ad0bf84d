//! Error types for `lockbox-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. None of them are surfaced to UI callers: a failed refresh
//! shows up as stale configuration, not as an error.

use lockbox_storage::StorageError;

/// Errors from the durable state store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The underlying storage backend returned an error.
    #[error("state storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored record could not be encoded or decoded.
    #[error("failed to (de)serialize '{key}': {reason}")]
    Serialization { key: String, reason: String },
}

/// Errors from the remote configuration API.
#[derive(Debug, thiserror::Error)]
pub enum ConfigApiError {
    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("config request to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// The server answered with an unexpected status code.
    #[error("config request to '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The response body was not a valid configuration document.
    #[error("config response from '{url}' could not be decoded: {reason}")]
    Decode { url: String, reason: String },
}

/// Errors from [`ConfigService`](crate::service::ConfigService) operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Fetching the configuration from the server failed.
    #[error("config fetch failed: {0}")]
    Fetch(#[from] ConfigApiError),

    /// The service has been shut down and no longer processes refreshes.
    #[error("config service is stopped")]
    Stopped,
}
