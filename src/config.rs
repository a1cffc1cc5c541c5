use crate::error::{ClientError, ClientResult};
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Publishing interval applied when a subscription is created with the
/// sentinel value 0.
pub const DEFAULT_PUBLISHING_INTERVAL_MS: u64 = 100;

/// Reconnect policy with exponential backoff.
///
/// Drives the session supervisor's retry loop after a failed connect attempt
/// or a server-driven connection loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Initial retry interval in milliseconds
    #[serde(default = "ReconnectPolicy::default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    /// Maximum retry interval cap in milliseconds
    #[serde(default = "ReconnectPolicy::default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Randomization factor in range [0.0, 1.0]. Example: 0.2 means ±20% jitter
    #[serde(default = "ReconnectPolicy::default_randomization_factor")]
    pub randomization_factor: f64,
    /// Multiplicative factor for each retry step
    #[serde(default = "ReconnectPolicy::default_multiplier")]
    pub multiplier: f64,
    /// Optional maximum total elapsed time in milliseconds (None = retry forever)
    #[serde(default)]
    pub max_elapsed_time_ms: Option<u64>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: Self::default_initial_interval_ms(),
            max_interval_ms: Self::default_max_interval_ms(),
            randomization_factor: Self::default_randomization_factor(),
            multiplier: Self::default_multiplier(),
            max_elapsed_time_ms: None,
        }
    }
}

impl ReconnectPolicy {
    fn default_initial_interval_ms() -> u64 {
        1_000
    }

    fn default_max_interval_ms() -> u64 {
        30_000
    }

    fn default_randomization_factor() -> f64 {
        0.2
    }

    fn default_multiplier() -> f64 {
        2.0
    }
}

/// Build an ExponentialBackoff from a ReconnectPolicy.
///
/// One-time builder per retry loop; the supervisor resets it after a
/// successful connection.
pub fn build_exponential_backoff(policy: &ReconnectPolicy) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(policy.initial_interval_ms.max(1)),
        max_interval: Duration::from_millis(policy.max_interval_ms.max(policy.initial_interval_ms)),
        randomization_factor: policy.randomization_factor.clamp(0.0, 1.0),
        multiplier: policy.multiplier.max(1.0),
        max_elapsed_time: policy.max_elapsed_time_ms.map(Duration::from_millis),
        ..ExponentialBackoff::default()
    }
}

/// Static configuration for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// OPC UA server endpoint URL (e.g. `opc.tcp://host:4840`)
    pub endpoint_url: String,
    /// Expected namespace URIs, slot position = configured namespace index.
    /// An empty string leaves the slot unconfigured (identity mapping).
    #[serde(default)]
    pub namespace_uris: Vec<String>,
    /// Length of the namespace table. The effective table length is the
    /// larger of this and `namespace_uris.len()`; writes beyond it are
    /// rejected.
    #[serde(default = "SessionConfig::default_namespace_capacity")]
    pub namespace_capacity: usize,
    /// Session timeout negotiated with the server
    #[serde(default = "SessionConfig::default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Keep alive interval
    #[serde(default = "SessionConfig::default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u32,
    /// Reconnect policy applied by the session supervisor
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl SessionConfig {
    fn default_namespace_capacity() -> usize {
        16
    }

    fn default_session_timeout_ms() -> u32 {
        30_000
    }

    fn default_keep_alive_interval_ms() -> u32 {
        30_000
    }

    /// Minimal configuration pointing at an endpoint, everything else default.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            namespace_uris: Vec::new(),
            namespace_capacity: Self::default_namespace_capacity(),
            session_timeout_ms: Self::default_session_timeout_ms(),
            keep_alive_interval_ms: Self::default_keep_alive_interval_ms(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Deserialize a configuration from a JSON value, as handed over by a
    /// host-side configuration store.
    pub fn from_json(value: serde_json::Value) -> ClientResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| ClientError::InvalidArgument(format!("session config: {e}")))
    }

    /// Effective namespace table length.
    pub fn namespace_table_len(&self) -> usize {
        self.namespace_capacity.max(self.namespace_uris.len())
    }
}
