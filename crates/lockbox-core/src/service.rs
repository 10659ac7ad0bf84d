//! Server configuration sync service.
//!
//! [`ConfigService`] owns the [`ConfigCache`] and the background tasks that
//! keep it fresh:
//!
//! - a **timer** that requests a refresh immediately and then every
//!   [`ConfigServiceOptions::refresh_interval`] (one hour by default),
//! - an **environment forwarder** that requests a refresh whenever the
//!   client's server URLs change,
//! - **manual** requests via [`ConfigService::trigger_refresh`] and
//!   [`ConfigService::refresh_now`].
//!
//! All three feed one FIFO queue drained by a single worker, so fetches never
//! overlap and results are published in the order they were requested. For
//! each request the worker fetches, drops empty answers, persists the record
//! (only while a user session exists), and then publishes a fresh
//! [`ServerConfig`] to every subscriber.
//!
//! At startup a separate task seeds the cache from storage, so a cold start
//! shows the last known configuration right away. The seed runs alongside
//! the first fetch and never overwrites a value the server already sent.
//!
//! # Failure handling
//!
//! A failed fetch is logged and leaves the cache untouched; the next timer
//! tick or trigger tries again. A failed write to storage is logged and the
//! configuration is still published. Storage read failures at startup are
//! treated as "nothing cached".

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::ConfigApi;
use crate::auth::{AuthStatus, AuthStatusProvider};
use crate::cache::{ConfigCache, ConfigSubscription, FlagSubscription};
use crate::environment::EnvironmentUrls;
use crate::error::ConfigError;
use crate::model::{FlagType, ServerConfig, ServerConfigData, resolve_flag};
use crate::state::ConfigStateStore;

/// Default time between scheduled refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Shorter intervals are raised to this.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// How long [`ConfigService::shutdown`] waits for an in-flight refresh.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Outcome of one refresh: the published config, or `None` if the server
/// had nothing new.
pub type RefreshOutcome = Result<Option<Arc<ServerConfig>>, ConfigError>;

/// Tuning knobs for [`ConfigService`].
#[derive(Debug, Clone)]
pub struct ConfigServiceOptions {
    /// Time between scheduled refreshes.
    pub refresh_interval: Duration,
    /// Queue a scheduled refresh right at startup. When off, the first tick
    /// fires one interval after start.
    pub fetch_on_start: bool,
}

impl Default for ConfigServiceOptions {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            fetch_on_start: true,
        }
    }
}

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Scheduled,
    EnvironmentChanged,
    Manual,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scheduled => "scheduled",
            Self::EnvironmentChanged => "environment_changed",
            Self::Manual => "manual",
        })
    }
}

struct RefreshRequest {
    reason: RefreshReason,
    respond_to: Option<oneshot::Sender<RefreshOutcome>>,
}

impl RefreshRequest {
    fn fire_and_forget(reason: RefreshReason) -> Self {
        Self {
            reason,
            respond_to: None,
        }
    }
}

/// Single source of truth for the current server configuration.
///
/// Construct one per process with [`ConfigService::start`] and pass it (or
/// an `Arc` of it) to whatever needs configuration or feature flags.
pub struct ConfigService {
    cache: Arc<ConfigCache>,
    requests: mpsc::UnboundedSender<RefreshRequest>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConfigService {
    /// Start the service on the current tokio runtime.
    ///
    /// Unless [`ConfigServiceOptions::fetch_on_start`] is off, the first
    /// scheduled refresh is queued immediately. The stored configuration is
    /// read from `state` concurrently and only published if nothing fresher
    /// has arrived.
    pub fn start(
        state: Arc<dyn ConfigStateStore>,
        api: Arc<dyn ConfigApi>,
        auth: Arc<dyn AuthStatusProvider>,
        environment_changes: broadcast::Receiver<EnvironmentUrls>,
        options: ConfigServiceOptions,
    ) -> Self {
        let cache = Arc::new(ConfigCache::new());
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let period = options.refresh_interval.max(MIN_REFRESH_INTERVAL);

        let pipeline = RefreshPipeline {
            cache: Arc::clone(&cache),
            state: Arc::clone(&state),
            api,
            auth,
        };

        let tasks = vec![
            tokio::spawn(seed_from_storage(
                Arc::clone(&cache),
                state,
                shutdown_rx.clone(),
            )),
            tokio::spawn(refresh_worker(pipeline, requests_rx, shutdown_rx.clone())),
            tokio::spawn(schedule_refreshes(
                requests_tx.clone(),
                shutdown_rx.clone(),
                period,
                options.fetch_on_start,
            )),
            tokio::spawn(forward_environment_changes(
                environment_changes,
                requests_tx.clone(),
                shutdown_rx,
            )),
        ];

        info!(refresh_interval_secs = period.as_secs(), "config service started");

        Self {
            cache,
            requests: requests_tx,
            shutdown_tx,
            tasks,
        }
    }

    /// Subscribe to configuration changes.
    ///
    /// The subscription yields the current configuration first (if one is
    /// cached) and then every later update.
    pub fn subscribe(&self) -> ConfigSubscription {
        self.cache.subscribe()
    }

    /// The latest configuration, if any has been loaded.
    pub fn current(&self) -> Option<Arc<ServerConfig>> {
        self.cache.current()
    }

    /// The underlying cache, for components that only read.
    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    /// Value of a feature flag in the latest configuration.
    ///
    /// Returns `default` when no configuration is loaded, the key is unset,
    /// or the value has a different type.
    pub fn get_feature_flag<T: FlagType>(&self, key: impl AsRef<str>, default: T) -> T {
        resolve_flag(self.cache.current().as_deref(), key, default)
    }

    /// Stream of a feature flag's value as configuration changes.
    pub fn feature_flag_updates<T: FlagType + Clone>(
        &self,
        key: impl Into<String>,
        default: T,
    ) -> FlagSubscription<T> {
        self.cache.subscribe_flag(key, default)
    }

    /// Queue one extra refresh and return immediately.
    pub fn trigger_refresh(&self) {
        if self
            .requests
            .send(RefreshRequest::fire_and_forget(RefreshReason::Manual))
            .is_err()
        {
            warn!("config service is stopped, manual refresh ignored");
        }
    }

    /// Queue one extra refresh and wait for its outcome.
    ///
    /// Requests already queued run first.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Fetch`] if this refresh's fetch failed.
    /// - [`ConfigError::Stopped`] if the service shut down before answering.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(RefreshRequest {
                reason: RefreshReason::Manual,
                respond_to: Some(tx),
            })
            .map_err(|_| ConfigError::Stopped)?;
        rx.await.map_err(|_| ConfigError::Stopped)?
    }

    /// Stop all background tasks.
    ///
    /// An in-flight refresh gets a grace period to finish its write before
    /// it is aborted.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for mut task in self.tasks.drain(..) {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!(error = %e, "config service task failed"),
                Err(_) => {
                    warn!("config service task did not stop in time, aborting");
                    task.abort();
                }
            }
        }
        info!("config service stopped");
    }
}

impl Drop for ConfigService {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl fmt::Debug for ConfigService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigService")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Fetch, persist, publish.
struct RefreshPipeline {
    cache: Arc<ConfigCache>,
    state: Arc<dyn ConfigStateStore>,
    api: Arc<dyn ConfigApi>,
    auth: Arc<dyn AuthStatusProvider>,
}

impl RefreshPipeline {
    async fn refresh(&self, reason: RefreshReason) -> RefreshOutcome {
        let response = match self.api.get().await {
            Ok(Some(response)) => response,
            Ok(None) => {
                debug!(%reason, "server returned no config, keeping cached value");
                return Ok(None);
            }
            Err(e) => {
                warn!(
                    %reason,
                    error = %e,
                    "server config fetch failed, will retry on next trigger"
                );
                return Err(e.into());
            }
        };

        let data = ServerConfigData::from(response);
        self.persist(&data).await;

        let config = Arc::new(ServerConfig::from(data));
        let version = self.cache.publish(Arc::clone(&config));
        info!(
            %reason,
            version,
            git_hash = %config.git_hash(),
            server_version = %config.version(),
            "server config updated"
        );
        Ok(Some(config))
    }

    async fn persist(&self, data: &ServerConfigData) {
        if self.auth.auth_status().await == AuthStatus::LoggedOut {
            debug!("no active session, not persisting server config");
            return;
        }

        if let Err(e) = self.state.set_server_config(data).await {
            warn!(error = %e, "failed to persist server config, keeping it in memory only");
        }
    }
}

async fn refresh_worker(
    pipeline: RefreshPipeline,
    mut requests: mpsc::UnboundedReceiver<RefreshRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let request = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let outcome = pipeline.refresh(request.reason).await;
        if let Some(respond_to) = request.respond_to {
            // The caller may have stopped waiting.
            let _ = respond_to.send(outcome);
        }
    }

    debug!("config refresh worker stopped");
}

async fn seed_from_storage(
    cache: Arc<ConfigCache>,
    state: Arc<dyn ConfigStateStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stored = tokio::select! {
        stored = state.server_config() => stored,
        _ = shutdown.changed() => return,
    };

    match stored {
        Ok(Some(data)) => {
            let config = Arc::new(ServerConfig::from(data));
            let git_hash = config.git_hash().to_owned();
            if cache.publish_if_empty(config) {
                info!(git_hash = %git_hash, "server config loaded from storage");
            } else {
                debug!("stored server config is older than the fetched one, ignoring");
            }
        }
        Ok(None) => debug!("no stored server config"),
        Err(e) => {
            warn!(error = %e, "failed to read stored server config, waiting for server");
        }
    }
}

async fn schedule_refreshes(
    requests: mpsc::UnboundedSender<RefreshRequest>,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
    fetch_on_start: bool,
) {
    let start = if fetch_on_start {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if requests
                    .send(RefreshRequest::fire_and_forget(RefreshReason::Scheduled))
                    .is_err()
                {
                    return;
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

async fn forward_environment_changes(
    mut changes: broadcast::Receiver<EnvironmentUrls>,
    requests: mpsc::UnboundedSender<RefreshRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = changes.recv() => event,
            _ = shutdown.changed() => return,
        };

        match event {
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "environment changes lagged, refreshing once");
            }
            Err(RecvError::Closed) => {
                debug!("environment change stream closed");
                return;
            }
        }

        if requests
            .send(RefreshRequest::fire_and_forget(
                RefreshReason::EnvironmentChanged,
            ))
            .is_err()
        {
            return;
        }
    }
}
