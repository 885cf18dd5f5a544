//! Runtime configuration
//!
//! Defaults, optionally overlaid by a TOML file, then by `TRACKING_*`
//! environment variables.
//!
//! ```toml
//! sla_sweep_interval_secs = 300
//!
//! [gateway]
//! min_latency_ms = 50
//! max_latency_ms = 400
//! failure_probability = 0.2
//!
//! [retry]
//! max_retries = 3
//!
//! [[catalog]]
//! code = "ORDER_CREATED"
//! name = "Order Created"
//! order = 0
//! category = "ORDERING"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::{StageCatalog, StageDefinition};
use crate::error::{TrackingError, TrackingResult};
use crate::gateway::{ErrorCode, DEFAULT_DOCUMENT_PREFIX};
use crate::sync::{HealthWeights, DEFAULT_MAX_RETRIES};

/// Simulated enterprise system settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub failure_probability: f64,
    /// Every simulated failure reports this code when set
    pub forced_error_code: Option<ErrorCode>,
    pub call_timeout_ms: u64,
    pub document_prefix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: 50,
            max_latency_ms: 400,
            failure_probability: 0.2,
            forced_error_code: None,
            call_timeout_ms: 5_000,
            document_prefix: DEFAULT_DOCUMENT_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub connected_weight: u32,
    pub degraded_weight: u32,
    pub disconnected_weight: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let weights = HealthWeights::default();
        Self {
            connected_weight: weights.connected,
            degraded_weight: weights.degraded,
            disconnected_weight: weights.disconnected,
        }
    }
}

impl HealthConfig {
    pub fn weights(&self) -> HealthWeights {
        HealthWeights {
            connected: self.connected_weight,
            degraded: self.degraded_weight,
            disconnected: self.disconnected_weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Custom catalog; the standard lifecycle when empty
    pub catalog: Vec<StageDefinition>,
    pub gateway: GatewayConfig,
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub sla_sweep_interval_secs: u64,
    /// RocksDB directory (requires the `heavy-state` feature)
    pub state_path: Option<PathBuf>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            catalog: Vec::new(),
            gateway: GatewayConfig::default(),
            retry: RetryConfig::default(),
            health: HealthConfig::default(),
            sla_sweep_interval_secs: 300,
            state_path: None,
        }
    }
}

impl TrackingConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a TOML file. Environment overrides are not applied.
    pub fn from_toml_file(path: &Path) -> TrackingResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrackingError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
            .map_err(|e| TrackingError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(text: &str) -> TrackingResult<Self> {
        toml::from_str(text).map_err(|e| TrackingError::config(e.to_string()))
    }

    /// Overlay `TRACKING_*` variables; unparsable values are ignored
    pub fn apply_env(&mut self) {
        if let Some(n) = env_parse("TRACKING_MAX_RETRIES") {
            self.retry.max_retries = n;
        }
        if let Some(p) = env_parse("TRACKING_FAILURE_PROBABILITY") {
            self.gateway.failure_probability = p;
        }
        if let Some(ms) = env_parse("TRACKING_MIN_LATENCY_MS") {
            self.gateway.min_latency_ms = ms;
        }
        if let Some(ms) = env_parse("TRACKING_MAX_LATENCY_MS") {
            self.gateway.max_latency_ms = ms;
        }
        if let Some(ms) = env_parse("TRACKING_CALL_TIMEOUT_MS") {
            self.gateway.call_timeout_ms = ms;
        }
        if let Some(code) = env_parse::<ErrorCode>("TRACKING_FORCED_ERROR_CODE") {
            self.gateway.forced_error_code = Some(code);
        }
        if let Some(secs) = env_parse("TRACKING_SLA_SWEEP_SECS") {
            self.sla_sweep_interval_secs = secs;
        }
        if let Ok(path) = std::env::var("TRACKING_STATE_PATH") {
            if !path.trim().is_empty() {
                self.state_path = Some(PathBuf::from(path));
            }
        }
    }

    pub fn validate(&self) -> TrackingResult<()> {
        let p = self.gateway.failure_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(TrackingError::config(format!(
                "failure_probability must be within [0, 1], got {}",
                p
            )));
        }
        if self.gateway.min_latency_ms > self.gateway.max_latency_ms {
            return Err(TrackingError::config(format!(
                "min_latency_ms ({}) exceeds max_latency_ms ({})",
                self.gateway.min_latency_ms, self.gateway.max_latency_ms
            )));
        }
        if self.gateway.call_timeout_ms == 0 {
            return Err(TrackingError::config("call_timeout_ms must be positive"));
        }
        if self.gateway.document_prefix.is_empty() {
            return Err(TrackingError::config("document_prefix must not be empty"));
        }
        if self.retry.max_retries == 0 {
            return Err(TrackingError::config("max_retries must be at least 1"));
        }
        if self.sla_sweep_interval_secs == 0 {
            return Err(TrackingError::config("sla_sweep_interval_secs must be positive"));
        }
        self.health.weights().validate()?;
        self.build_catalog().map(|_| ())
    }

    /// The configured catalog, or the standard lifecycle
    pub fn build_catalog(&self) -> TrackingResult<StageCatalog> {
        if self.catalog.is_empty() {
            return Ok(StageCatalog::standard());
        }
        StageCatalog::new(self.catalog.clone())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
