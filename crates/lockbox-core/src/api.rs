//! Remote configuration API seam.

use crate::error::ConfigApiError;
use crate::model::ServerConfigResponse;

/// Fetches the latest server configuration.
///
/// `Ok(None)` means the server had nothing to offer (empty body, no
/// endpoint); the caller skips it without treating it as a failure.
#[async_trait::async_trait]
pub trait ConfigApi: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns a [`ConfigApiError`] when the request fails in transport, the
    /// server answers with an error status, or the body cannot be decoded.
    async fn get(&self) -> Result<Option<ServerConfigResponse>, ConfigApiError>;
}
