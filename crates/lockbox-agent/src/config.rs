//! Agent configuration.
//!
//! Loaded from environment variables with sensible defaults. Command-line
//! flags in the binary override individual fields after loading.

use std::path::PathBuf;
use std::time::Duration;

use lockbox_core::auth::AuthStatus;
use lockbox_core::environment::EnvironmentUrls;
use lockbox_core::service::DEFAULT_REFRESH_INTERVAL;

/// Default location of the file-backed state store.
pub const DEFAULT_STATE_PATH: &str = "./data/state.json";

/// Default HTTP request timeout in seconds.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Agent runtime configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Server URLs the agent talks to.
    pub environment: EnvironmentUrls,
    /// Where client state is persisted.
    pub storage: StorageKind,
    /// Time between scheduled config refreshes.
    pub refresh_interval: Duration,
    /// Session state reported to the config service.
    pub auth_status: AuthStatus,
    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
    /// Timeout for a single config request.
    pub http_timeout: Duration,
}

/// Which storage backend holds client state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKind {
    /// In-memory only; state is lost on exit.
    Memory,
    /// Single JSON document on disk.
    File { path: PathBuf },
}

impl AgentConfig {
    /// Load configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `LOCKBOX_BASE_URL` | unset |
    /// | `LOCKBOX_API_URL` | unset (derived from the base URL) |
    /// | `LOCKBOX_STORAGE` | `file` (`memory` or `file`) |
    /// | `LOCKBOX_STATE_PATH` | `./data/state.json` |
    /// | `LOCKBOX_REFRESH_INTERVAL` | `3600` seconds |
    /// | `LOCKBOX_AUTH_STATUS` | `logged_out` |
    /// | `LOCKBOX_LOG_LEVEL` | `info` |
    /// | `LOCKBOX_LOG_FORMAT` | `json` (`json` or `pretty`) |
    /// | `LOCKBOX_HTTP_TIMEOUT` | `10` seconds |
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unparseable values fall back to their defaults.
    #[must_use]
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let environment = EnvironmentUrls {
            base: var("LOCKBOX_BASE_URL"),
            api: var("LOCKBOX_API_URL"),
            ..EnvironmentUrls::default()
        };

        let state_path = var("LOCKBOX_STATE_PATH").unwrap_or_else(|| DEFAULT_STATE_PATH.to_owned());
        let storage = match var("LOCKBOX_STORAGE").as_deref().map(str::trim) {
            Some("memory") => StorageKind::Memory,
            _ => StorageKind::File {
                path: PathBuf::from(state_path),
            },
        };

        let refresh_interval = var("LOCKBOX_REFRESH_INTERVAL")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(DEFAULT_REFRESH_INTERVAL, Duration::from_secs);

        let auth_status = var("LOCKBOX_AUTH_STATUS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(AuthStatus::LoggedOut);

        let log_level = var("LOCKBOX_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());
        let log_json = !matches!(var("LOCKBOX_LOG_FORMAT").as_deref(), Some("pretty"));

        let http_timeout = Duration::from_secs(
            var("LOCKBOX_HTTP_TIMEOUT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        );

        Self {
            environment,
            storage,
            refresh_interval,
            auth_status,
            log_level,
            log_json,
            http_timeout,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_vars(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> AgentConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        AgentConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.environment, EnvironmentUrls::default());
        assert_eq!(
            config.storage,
            StorageKind::File {
                path: PathBuf::from(DEFAULT_STATE_PATH)
            }
        );
        assert_eq!(config.refresh_interval, DEFAULT_REFRESH_INTERVAL);
        assert_eq!(config.auth_status, AuthStatus::LoggedOut);
        assert_eq!(config.log_level, "info");
        assert!(config.log_json);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn reads_every_variable() {
        let config = load(&[
            ("LOCKBOX_BASE_URL", "https://vault.example.com"),
            ("LOCKBOX_API_URL", "https://api.example.com"),
            ("LOCKBOX_STORAGE", "memory"),
            ("LOCKBOX_REFRESH_INTERVAL", "60"),
            ("LOCKBOX_AUTH_STATUS", "unlocked"),
            ("LOCKBOX_LOG_LEVEL", "debug"),
            ("LOCKBOX_LOG_FORMAT", "pretty"),
            ("LOCKBOX_HTTP_TIMEOUT", "3"),
        ]);

        assert_eq!(config.environment.base.as_deref(), Some("https://vault.example.com"));
        assert_eq!(config.environment.api_url(), "https://api.example.com");
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.auth_status, AuthStatus::Unlocked);
        assert_eq!(config.log_level, "debug");
        assert!(!config.log_json);
        assert_eq!(config.http_timeout, Duration::from_secs(3));
    }

    #[test]
    fn custom_state_path() {
        let config = load(&[("LOCKBOX_STATE_PATH", "/var/lib/lockbox/state.json")]);
        assert_eq!(
            config.storage,
            StorageKind::File {
                path: PathBuf::from("/var/lib/lockbox/state.json")
            }
        );
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = load(&[
            ("LOCKBOX_REFRESH_INTERVAL", "hourly"),
            ("LOCKBOX_AUTH_STATUS", "sleeping"),
            ("LOCKBOX_HTTP_TIMEOUT", "-1"),
            ("LOCKBOX_BASE_URL", "   "),
        ]);
        assert_eq!(config.refresh_interval, DEFAULT_REFRESH_INTERVAL);
        assert_eq!(config.auth_status, AuthStatus::LoggedOut);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert!(config.environment.base.is_none());
    }
}
