//! Shared agent state.
//!
//! A single [`AgentState`] is built at startup from [`AgentConfig`]. It owns
//! the long-lived collaborators of the config service (environment, auth
//! status, state store, HTTP API) and starts the service on demand.

use std::sync::Arc;

use lockbox_core::api::ConfigApi;
use lockbox_core::auth::{AuthState, AuthStatusProvider};
use lockbox_core::environment::EnvironmentService;
use lockbox_core::service::{ConfigService, ConfigServiceOptions};
use lockbox_core::state::{ConfigStateStore, StorageStateService};
use lockbox_storage::{FileBackend, MemoryBackend, StorageBackend};
use tracing::info;

use crate::api::HttpConfigApi;
use crate::config::{AgentConfig, StorageKind};
use crate::error::AgentError;

/// Components shared by every agent command.
#[derive(Debug)]
pub struct AgentState {
    /// Server URLs; changing them triggers a config refresh.
    pub environment: Arc<EnvironmentService>,
    /// Session state consulted before persisting.
    pub auth: Arc<AuthState>,
    /// Persisted client state.
    pub state_store: Arc<StorageStateService>,
    /// Remote config endpoint.
    pub api: Arc<HttpConfigApi>,
    options: ConfigServiceOptions,
}

impl AgentState {
    /// Wire up storage, environment, auth, and the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::HttpClient`] if the HTTP client cannot be built.
    pub fn build(config: &AgentConfig) -> Result<Self, AgentError> {
        let storage: Arc<dyn StorageBackend> = match &config.storage {
            StorageKind::Memory => {
                info!("using in-memory storage (state will not persist)");
                Arc::new(MemoryBackend::new())
            }
            StorageKind::File { path } => {
                info!(path = %path.display(), "using file storage");
                Arc::new(FileBackend::new(path))
            }
        };

        let environment = Arc::new(EnvironmentService::new(config.environment.clone()));
        let api = Arc::new(HttpConfigApi::new(
            Arc::clone(&environment),
            config.http_timeout,
        )?);

        Ok(Self {
            environment,
            auth: Arc::new(AuthState::new(config.auth_status)),
            state_store: Arc::new(StorageStateService::new(storage)),
            api,
            options: ConfigServiceOptions {
                refresh_interval: config.refresh_interval,
                ..ConfigServiceOptions::default()
            },
        })
    }

    /// Start a long-running config service that refreshes on a schedule.
    pub fn start_service(&self) -> ConfigService {
        self.start_with(self.options.clone())
    }

    /// Start a config service for a single lookup.
    ///
    /// No fetch is scheduled at startup; callers drive it with
    /// [`ConfigService::refresh_now`].
    pub fn start_oneshot(&self) -> ConfigService {
        self.start_with(ConfigServiceOptions {
            fetch_on_start: false,
            ..self.options.clone()
        })
    }

    fn start_with(&self, options: ConfigServiceOptions) -> ConfigService {
        ConfigService::start(
            Arc::clone(&self.state_store) as Arc<dyn ConfigStateStore>,
            Arc::clone(&self.api) as Arc<dyn ConfigApi>,
            Arc::clone(&self.auth) as Arc<dyn AuthStatusProvider>,
            self.environment.subscribe(),
            options,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lockbox_core::auth::AuthStatus;
    use lockbox_core::environment::EnvironmentUrls;
    use lockbox_core::error::ConfigError;

    use super::*;

    #[tokio::test]
    async fn oneshot_service_reports_unreachable_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = AgentConfig {
            environment: EnvironmentUrls {
                api: Some(format!("http://{addr}")),
                ..EnvironmentUrls::default()
            },
            storage: StorageKind::Memory,
            auth_status: AuthStatus::Unlocked,
            ..AgentConfig::default()
        };
        let state = AgentState::build(&config).unwrap();
        assert_eq!(state.auth.status(), AuthStatus::Unlocked);

        let service = state.start_oneshot();
        let outcome = service.refresh_now().await;
        assert!(matches!(outcome, Err(ConfigError::Fetch(_))));
        assert!(service.current().is_none());
        service.shutdown().await;
    }
}
