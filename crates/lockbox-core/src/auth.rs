//! Authentication status as seen by background services.
//!
//! The config service never logs anyone in; it only asks whether a user
//! session exists before writing server state to disk.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Session state of the active account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    LoggedOut,
    Locked,
    Unlocked,
}

impl AuthStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoggedOut => "logged_out",
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
        }
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "logged_out" | "loggedout" => Ok(Self::LoggedOut),
            "locked" => Ok(Self::Locked),
            "unlocked" => Ok(Self::Unlocked),
            other => Err(format!(
                "unknown auth status '{other}' (expected logged_out, locked, or unlocked)"
            )),
        }
    }
}

/// Source of the current [`AuthStatus`].
#[async_trait::async_trait]
pub trait AuthStatusProvider: Send + Sync + 'static {
    async fn auth_status(&self) -> AuthStatus;
}

/// Auth status holder updated by the host application.
///
/// Backed by a `watch` channel so other components can also await changes
/// via [`AuthState::changes`].
#[derive(Debug)]
pub struct AuthState {
    tx: watch::Sender<AuthStatus>,
}

impl AuthState {
    #[must_use]
    pub fn new(initial: AuthStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the current status. Watchers are notified only on change.
    pub fn set(&self, status: AuthStatus) {
        self.tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    pub fn status(&self) -> AuthStatus {
        *self.tx.borrow()
    }

    /// Receiver that observes every status change.
    pub fn changes(&self) -> watch::Receiver<AuthStatus> {
        self.tx.subscribe()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new(AuthStatus::LoggedOut)
    }
}

#[async_trait::async_trait]
impl AuthStatusProvider for AuthState {
    async fn auth_status(&self) -> AuthStatus {
        self.status()
    }
}
