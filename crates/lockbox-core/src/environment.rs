//! Client environment (which server the client talks to).
//!
//! [`EnvironmentService`] holds the configured base URLs and announces every
//! change on a broadcast channel. The config service subscribes to it so a
//! region or self-hosted switch immediately refetches server configuration.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

/// API base used when neither an API nor a base URL is configured.
pub const DEFAULT_API_URL: &str = "https://api.lockbox.cloud";

/// Capacity of the change channel; a lagging receiver still sees a change.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Configured server URLs. All optional; unset fields fall back to `base`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentUrls {
    pub base: Option<String>,
    pub api: Option<String>,
    pub identity: Option<String>,
    pub web_vault: Option<String>,
    pub notifications: Option<String>,
}

impl EnvironmentUrls {
    /// Resolve the API base URL without a trailing slash.
    pub fn api_url(&self) -> String {
        let url = match (non_empty(self.api.as_deref()), non_empty(self.base.as_deref())) {
            (Some(api), _) => api.to_owned(),
            (None, Some(base)) => format!("{}/api", base.trim_end_matches('/')),
            (None, None) => DEFAULT_API_URL.to_owned(),
        };
        url.trim_end_matches('/').to_owned()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Holder of the current [`EnvironmentUrls`].
#[derive(Debug)]
pub struct EnvironmentService {
    urls: RwLock<EnvironmentUrls>,
    changes: broadcast::Sender<EnvironmentUrls>,
}

impl EnvironmentService {
    #[must_use]
    pub fn new(urls: EnvironmentUrls) -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            urls: RwLock::new(urls),
            changes,
        }
    }

    /// Current URLs.
    pub fn urls(&self) -> EnvironmentUrls {
        self.urls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the URLs and notify subscribers.
    pub fn set_urls(&self, urls: EnvironmentUrls) {
        *self.urls.write().unwrap_or_else(PoisonError::into_inner) = urls.clone();
        info!(api = %urls.api_url(), "environment urls changed");
        // No subscribers is fine: nothing to refresh yet.
        let _ = self.changes.send(urls);
    }

    /// Stream of URL changes, starting after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EnvironmentUrls> {
        self.changes.subscribe()
    }
}

impl Default for EnvironmentService {
    fn default() -> Self {
        Self::new(EnvironmentUrls::default())
    }
}
