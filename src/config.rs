// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the admission service.
//!
//! Defaults mirror the community-reporting deployment: a 500-entry cache
//! with a five minute TTL, a one hour behavior window and a week of
//! telemetry retention.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Upper bound for the scoring window and retention period (100 years).
pub const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 3600;

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// In-process cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Behavior telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Limit policy configuration
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Bounded cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries (default: 500)
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    /// TTL applied when `set` gets none; `None` disables expiry (default: 300)
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: Option<u64>,
}

/// Telemetry window and retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Trailing window used for behavior scoring (default: 3600)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Events older than this are pruned (default: 604800)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Interval between pruning and counter cleanup passes (default: 60)
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

/// Limit policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Replacement endpoint override table, e.g.
    /// `{"main.login": ["5 per minute", "20 per hour"]}`.
    /// When absent the built-in table is used.
    #[serde(default)]
    pub endpoint_overrides: Option<BTreeMap<String, Vec<String>>>,

    /// Caller-reported reputations kept at once; the least recently used
    /// is dropped beyond this (default: 10000)
    #[serde(default = "default_reputation_max_entries")]
    pub reputation_max_entries: usize,

    /// How long a reported reputation is trusted (default: 3600)
    #[serde(default = "default_reputation_ttl_secs")]
    pub reputation_ttl_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_cache_max_size() -> usize {
    500
}

fn default_cache_ttl_secs() -> Option<u64> {
    Some(300)
}

fn default_window_secs() -> u64 {
    3600
}

fn default_retention_secs() -> u64 {
    7 * 24 * 3600
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

fn default_reputation_max_entries() -> usize {
    10_000
}

fn default_reputation_ttl_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cache: CacheConfig::default(),
            telemetry: TelemetryConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            default_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            retention_secs: default_retention_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            endpoint_overrides: None,
            reputation_max_entries: default_reputation_max_entries(),
            reputation_ttl_secs: default_reputation_ttl_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl Config {
    /// Load configuration from an optional JSON file (`CONFIG_PATH`) and then
    /// apply environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`.
    /// A variable that is set but does not parse is an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("CONFIG_PATH") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
                serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            None => Config::default(),
        };

        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(v) = env_parse(&lookup, "CACHE_MAX_SIZE")? {
            config.cache.max_size = v;
        }
        if let Some(v) = env_parse(&lookup, "CACHE_DEFAULT_TTL_SECS")? {
            config.cache.default_ttl_secs = Some(v);
        }
        if let Some(v) = env_parse(&lookup, "BEHAVIOR_WINDOW_SECS")? {
            config.telemetry.window_secs = v;
        }
        if let Some(v) = env_parse(&lookup, "TELEMETRY_RETENTION_SECS")? {
            config.telemetry.retention_secs = v;
        }
        if let Some(v) = env_parse(&lookup, "MAINTENANCE_INTERVAL_SECS")? {
            config.telemetry.maintenance_interval_secs = v;
        }
        if let Some(v) = env_parse(&lookup, "REPUTATION_MAX_ENTRIES")? {
            config.limits.reputation_max_entries = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that must not serve traffic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        self.cache.validate()?;
        self.telemetry.validate()?;
        self.limits.validate()?;
        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(ConfigError::InvalidMetricsPath(self.metrics.path.clone()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(self.bind_addr.clone()))
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::NonPositive {
                field: "cache.max_size",
            });
        }
        if self.default_ttl_secs == Some(0) {
            return Err(ConfigError::NonPositive {
                field: "cache.default_ttl_secs",
            });
        }
        Ok(())
    }

    /// Get the default entry lifetime
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}

impl LimitsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reputation_max_entries == 0 {
            return Err(ConfigError::NonPositive {
                field: "limits.reputation_max_entries",
            });
        }
        if self.reputation_ttl_secs == 0 {
            return Err(ConfigError::NonPositive {
                field: "limits.reputation_ttl_secs",
            });
        }
        Ok(())
    }

    /// Cache settings for caller-reported reputations.
    pub fn reputation_cache(&self) -> CacheConfig {
        CacheConfig {
            max_size: self.reputation_max_entries,
            default_ttl_secs: Some(self.reputation_ttl_secs),
        }
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_secs == 0 {
            return Err(ConfigError::NonPositive {
                field: "telemetry.window_secs",
            });
        }
        if self.maintenance_interval_secs == 0 {
            return Err(ConfigError::NonPositive {
                field: "telemetry.maintenance_interval_secs",
            });
        }
        if self.window_secs > MAX_SPAN_SECS {
            return Err(ConfigError::TooLarge {
                field: "telemetry.window_secs",
                max: MAX_SPAN_SECS,
            });
        }
        if self.retention_secs > MAX_SPAN_SECS {
            return Err(ConfigError::TooLarge {
                field: "telemetry.retention_secs",
                max: MAX_SPAN_SECS,
            });
        }
        if self.retention_secs < self.window_secs {
            return Err(ConfigError::RetentionShorterThanWindow {
                retention_secs: self.retention_secs,
                window_secs: self.window_secs,
            });
        }
        Ok(())
    }

    /// Get the scoring window
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Get the retention period
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Get the maintenance interval
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

fn env_parse<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(ConfigError::InvalidEnv { name, value }),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.max_size, 500);
        assert_eq!(config.telemetry.window(), Duration::from_secs(3600));
    }

    #[test]
    fn test_retention_must_cover_window() {
        let config = Config {
            telemetry: TelemetryConfig {
                window_secs: 3600,
                retention_secs: 60,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::RetentionShorterThanWindow {
                retention_secs: 60,
                window_secs: 3600
            })
        );
    }

    #[test]
    fn test_rejects_bad_bind_addr() {
        let config = Config {
            bind_addr: "not-an-addr".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBindAddr(_))));
    }

    #[test]
    fn test_rejects_relative_metrics_path() {
        let mut config = Config::default();
        config.metrics.path = "metrics".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMetricsPath("metrics".to_string()))
        );

        config.metrics.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"cache": {"max_size": 10}, "limits": {"endpoint_overrides": {"main.login": ["3/minute"]}}}"#)
                .unwrap();
        assert_eq!(config.cache.max_size, 10);
        assert_eq!(config.cache.default_ttl_secs, Some(300));
        assert_eq!(config.telemetry.retention_secs, 604_800);
        assert!(config.limits.endpoint_overrides.is_some());
    }

    #[test]
    fn test_rejects_spans_beyond_calendar_range() {
        let mut config = Config::default();
        config.telemetry.window_secs = 10_000_000_000_000;
        config.telemetry.retention_secs = 10_000_000_000_000;
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooLarge {
                field: "telemetry.window_secs",
                max: MAX_SPAN_SECS
            })
        );

        config.telemetry.window_secs = 3600;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooLarge {
                field: "telemetry.retention_secs",
                ..
            })
        ));
    }

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: BTreeMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_env_overrides_apply() {
        let config = Config::from_lookup(lookup_from(&[
            ("CACHE_MAX_SIZE", "64"),
            ("BEHAVIOR_WINDOW_SECS", "1800"),
            ("BIND_ADDR", "127.0.0.1:9000"),
        ]))
        .unwrap();
        assert_eq!(config.cache.max_size, 64);
        assert_eq!(config.telemetry.window_secs, 1800);
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.telemetry.retention_secs, 604_800);
    }

    #[test]
    fn test_unparseable_env_is_rejected() {
        assert_eq!(
            Config::from_lookup(lookup_from(&[("CACHE_MAX_SIZE", "-5")])).unwrap_err(),
            ConfigError::InvalidEnv {
                name: "CACHE_MAX_SIZE",
                value: "-5".to_string()
            }
        );
        assert!(matches!(
            Config::from_lookup(lookup_from(&[("BEHAVIOR_WINDOW_SECS", "one hour")])),
            Err(ConfigError::InvalidEnv {
                name: "BEHAVIOR_WINDOW_SECS",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_empty_reputation_cache() {
        let mut config = Config::default();
        config.limits.reputation_max_entries = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositive {
                field: "limits.reputation_max_entries"
            })
        );
    }
}
