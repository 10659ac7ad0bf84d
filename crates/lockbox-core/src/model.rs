//! Server configuration model.
//!
//! Three shapes of the same information:
//!
//! - [`ServerConfigResponse`] — what the `/config` endpoint returns. Treated
//!   as an external contract; unknown fields are ignored.
//! - [`ServerConfigData`] — the serializable record written to local storage.
//! - [`ServerConfig`] — the immutable in-memory snapshot handed to
//!   subscribers as `Arc<ServerConfig>`. It can only be built from a
//!   [`ServerConfigData`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Third-party (self-hosted or partner) server descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThirdPartyServer {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
}

/// Environment URLs reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentServer {
    pub vault: Option<String>,
    pub api: Option<String>,
    pub identity: Option<String>,
    pub notifications: Option<String>,
    pub sso: Option<String>,
}

/// Body of `GET /config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfigResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(deserialize_with = "null_as_default")]
    pub git_hash: String,
    pub server: Option<ThirdPartyServer>,
    pub environment: Option<EnvironmentServer>,
    /// Raw flag values. Anything that is not a bool, number, or string is
    /// dropped when converting to [`ServerConfigData`].
    #[serde(deserialize_with = "null_as_default")]
    pub feature_states: HashMap<String, serde_json::Value>,
}

/// Decode a field that may be absent or `null`, using its default for both.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A single feature flag value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl FlagValue {
    /// Convert a raw JSON value. `null`, arrays, and objects are not flags.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Types a feature flag can be read as.
///
/// A flag whose stored value has a different type reads as unset, so the
/// caller's default applies.
pub trait FlagType: Sized {
    fn from_flag(value: &FlagValue) -> Option<Self>;
}

impl FlagType for bool {
    fn from_flag(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FlagType for f64 {
    fn from_flag(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl FlagType for i64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn from_flag(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Number(n)
                if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n < i64::MAX as f64 =>
            {
                Some(*n as i64)
            }
            _ => None,
        }
    }
}

impl FlagType for String {
    fn from_flag(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FlagType for FlagValue {
    fn from_flag(value: &FlagValue) -> Option<Self> {
        Some(value.clone())
    }
}

/// Known feature flag keys.
///
/// Any `AsRef<str>` works as a key; this enum just avoids typos for the
/// flags clients ship with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureFlag {
    DisplayEuEnvironment,
    DisplayLowKdfMessage,
    Fido2VaultCredentials,
    TrustedDeviceEncryption,
    PasswordlessLogin,
    AutofillV2,
    BrowserFilelessImport,
}

impl FeatureFlag {
    pub const ALL: [Self; 7] = [
        Self::DisplayEuEnvironment,
        Self::DisplayLowKdfMessage,
        Self::Fido2VaultCredentials,
        Self::TrustedDeviceEncryption,
        Self::PasswordlessLogin,
        Self::AutofillV2,
        Self::BrowserFilelessImport,
    ];

    /// Wire name of the flag in `featureStates`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DisplayEuEnvironment => "display-eu-environment",
            Self::DisplayLowKdfMessage => "display-lowkdf-message",
            Self::Fido2VaultCredentials => "fido2-vault-credentials",
            Self::TrustedDeviceEncryption => "trusted-device-encryption",
            Self::PasswordlessLogin => "passwordless-login",
            Self::AutofillV2 => "autofill-v2",
            Self::BrowserFilelessImport => "browser-fileless-import",
        }
    }
}

impl AsRef<str> for FeatureFlag {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted form of the server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfigData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub git_hash: String,
    #[serde(default)]
    pub server: Option<ThirdPartyServer>,
    #[serde(default)]
    pub environment: Option<EnvironmentServer>,
    /// When this record was built from a server response.
    pub utc_date: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub feature_states: BTreeMap<String, FlagValue>,
}

impl ServerConfigData {
    /// Build the persisted record from a response received at `received_at`.
    pub fn from_response(response: ServerConfigResponse, received_at: DateTime<Utc>) -> Self {
        let feature_states = response
            .feature_states
            .iter()
            .filter_map(|(key, raw)| {
                let value = FlagValue::from_json(raw);
                if value.is_none() {
                    debug!(flag = %key, "ignoring non-scalar feature state");
                }
                value.map(|v| (key.clone(), v))
            })
            .collect();

        Self {
            version: response.version,
            git_hash: response.git_hash,
            server: response.server,
            environment: response.environment,
            utc_date: received_at,
            feature_states,
        }
    }
}

impl From<ServerConfigResponse> for ServerConfigData {
    fn from(response: ServerConfigResponse) -> Self {
        Self::from_response(response, Utc::now())
    }
}

/// Immutable snapshot of the server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    version: String,
    git_hash: String,
    server: Option<ThirdPartyServer>,
    environment: Option<EnvironmentServer>,
    utc_date: DateTime<Utc>,
    feature_states: BTreeMap<String, FlagValue>,
}

impl From<ServerConfigData> for ServerConfig {
    fn from(data: ServerConfigData) -> Self {
        Self {
            version: data.version,
            git_hash: data.git_hash,
            server: data.server,
            environment: data.environment,
            utc_date: data.utc_date,
            feature_states: data.feature_states,
        }
    }
}

impl ServerConfig {
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Build identifier of the server.
    pub fn git_hash(&self) -> &str {
        &self.git_hash
    }

    pub fn server(&self) -> Option<&ThirdPartyServer> {
        self.server.as_ref()
    }

    pub fn environment(&self) -> Option<&EnvironmentServer> {
        self.environment.as_ref()
    }

    pub fn utc_date(&self) -> DateTime<Utc> {
        self.utc_date
    }

    pub fn feature_states(&self) -> &BTreeMap<String, FlagValue> {
        &self.feature_states
    }

    /// Raw value of a flag, if the server set it.
    pub fn feature_state(&self, key: impl AsRef<str>) -> Option<&FlagValue> {
        self.feature_states.get(key.as_ref())
    }

    /// Typed value of a flag. `None` when unset or of another type.
    pub fn feature_flag<T: FlagType>(&self, key: impl AsRef<str>) -> Option<T> {
        self.feature_state(key).and_then(T::from_flag)
    }

    /// Copy back into the persisted form.
    pub fn to_data(&self) -> ServerConfigData {
        ServerConfigData {
            version: self.version.clone(),
            git_hash: self.git_hash.clone(),
            server: self.server.clone(),
            environment: self.environment.clone(),
            utc_date: self.utc_date,
            feature_states: self.feature_states.clone(),
        }
    }
}

/// Look up `key` in an optional configuration, falling back to `default`.
pub fn resolve_flag<T: FlagType>(
    config: Option<&ServerConfig>,
    key: impl AsRef<str>,
    default: T,
) -> T {
    config
        .and_then(|c| c.feature_flag(key))
        .unwrap_or(default)
}
