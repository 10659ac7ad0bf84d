//! Latest-value cell for the server configuration.
//!
//! [`ConfigCache`] keeps the most recent [`ServerConfig`], a version counter,
//! and one unbounded queue per subscriber. A new [`ConfigSubscription`] first
//! replays the current value (if any) and then receives every later
//! publication exactly once, in publication order. Registration and the
//! replay snapshot happen under the same lock as publication, so a
//! subscriber can neither miss nor double-see a value published concurrently.
//!
//! The refresh pipeline is the only writer. Readers never block it: a
//! publication is a lock, a pointer swap, and one channel send per listener.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::trace;

use crate::model::{FlagType, ServerConfig, resolve_flag};

type Listener = mpsc::UnboundedSender<Arc<ServerConfig>>;

#[derive(Default)]
struct CacheState {
    current: Option<Arc<ServerConfig>>,
    version: u64,
    next_listener_id: u64,
    listeners: HashMap<u64, Listener>,
}

/// Process-local holder of the last known server configuration.
#[derive(Default)]
pub struct ConfigCache {
    state: Mutex<CacheState>,
}

impl ConfigCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The latest configuration, or `None` before the first publication.
    pub fn current(&self) -> Option<Arc<ServerConfig>> {
        self.lock().current.clone()
    }

    /// Number of publications so far. Zero means nothing has been cached.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Replace the current configuration and notify every subscriber.
    ///
    /// Returns the new version.
    pub fn publish(&self, config: Arc<ServerConfig>) -> u64 {
        let mut state = self.lock();
        Self::publish_locked(&mut state, config)
    }

    /// Publish only if nothing has been published yet.
    ///
    /// Used to seed the cache from storage without overwriting a fresher
    /// value that arrived from the server first.
    pub fn publish_if_empty(&self, config: Arc<ServerConfig>) -> bool {
        let mut state = self.lock();
        if state.current.is_some() {
            return false;
        }
        Self::publish_locked(&mut state, config);
        true
    }

    fn publish_locked(state: &mut CacheState, config: Arc<ServerConfig>) -> u64 {
        state.version = state.version.saturating_add(1);
        state.current = Some(Arc::clone(&config));
        // A failed send means the subscription was dropped without running
        // its destructor yet; forget it.
        state
            .listeners
            .retain(|_, listener| listener.send(Arc::clone(&config)).is_ok());
        trace!(
            version = state.version,
            listeners = state.listeners.len(),
            "server config published"
        );
        state.version
    }

    /// Subscribe to configuration changes.
    pub fn subscribe(self: &Arc<Self>) -> ConfigSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_listener_id;
        state.next_listener_id = state.next_listener_id.wrapping_add(1);
        state.listeners.insert(id, tx);

        ConfigSubscription {
            id,
            replay: state.current.clone(),
            rx,
            cache: Arc::downgrade(self),
        }
    }

    /// Subscribe to one feature flag.
    ///
    /// Yields `default` right away when nothing is cached, then one value
    /// per published configuration.
    pub fn subscribe_flag<T: FlagType + Clone>(
        self: &Arc<Self>,
        key: impl Into<String>,
        default: T,
    ) -> FlagSubscription<T> {
        let inner = self.subscribe();
        FlagSubscription {
            pending_default: inner.replay.is_none(),
            inner,
            key: key.into(),
            default,
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().listeners.remove(&id);
    }
}

impl std::fmt::Debug for ConfigCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ConfigCache")
            .field("version", &state.version)
            .field("listeners", &state.listeners.len())
            .finish_non_exhaustive()
    }
}

/// Stream of configurations from a [`ConfigCache`].
///
/// Dropping the subscription unregisters it.
#[derive(Debug)]
pub struct ConfigSubscription {
    id: u64,
    replay: Option<Arc<ServerConfig>>,
    rx: mpsc::UnboundedReceiver<Arc<ServerConfig>>,
    cache: Weak<ConfigCache>,
}

impl ConfigSubscription {
    /// Wait for the next configuration.
    ///
    /// The first call returns the value that was current at subscribe time,
    /// if there was one. Returns `None` once the cache has been dropped and
    /// every queued value has been delivered.
    pub async fn next(&mut self) -> Option<Arc<ServerConfig>> {
        if let Some(config) = self.replay.take() {
            return Some(config);
        }
        self.rx.recv().await
    }

    /// Like [`next`](Self::next) but returns `None` instead of waiting.
    pub fn try_next(&mut self) -> Option<Arc<ServerConfig>> {
        if let Some(config) = self.replay.take() {
            return Some(config);
        }
        self.rx.try_recv().ok()
    }
}

impl Drop for ConfigSubscription {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.unsubscribe(self.id);
        }
    }
}

/// Stream of one feature flag's value, see [`ConfigCache::subscribe_flag`].
#[derive(Debug)]
pub struct FlagSubscription<T> {
    inner: ConfigSubscription,
    key: String,
    default: T,
    pending_default: bool,
}

impl<T: FlagType + Clone> FlagSubscription<T> {
    /// Wait for the next flag value.
    pub async fn next(&mut self) -> Option<T> {
        if self.pending_default {
            self.pending_default = false;
            return Some(self.default.clone());
        }
        let config = self.inner.next().await?;
        Some(resolve_flag(Some(config.as_ref()), &self.key, self.default.clone()))
    }
}
