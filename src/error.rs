// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types shared across the admission engine.

use crate::metrics::MetricsError;
use std::time::Duration;
use thiserror::Error;

/// Configuration rejected at construction time, before serving traffic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    #[error("invalid rate limit '{value}': {reason}")]
    InvalidLimit { value: String, reason: String },

    #[error("endpoint override for '{endpoint}' defines {period} more than once")]
    DuplicatePeriod { endpoint: String, period: &'static str },

    #[error("{field} must not exceed {max}")]
    TooLarge { field: &'static str, max: u64 },

    #[error("invalid value for {name}: '{value}'")]
    InvalidEnv { name: &'static str, value: String },

    #[error("telemetry retention ({retention_secs}s) is shorter than the scoring window ({window_secs}s)")]
    RetentionShorterThanWindow { retention_secs: u64, window_secs: u64 },

    #[error("metrics path '{0}' must start with '/'")]
    InvalidMetricsPath(String),

    #[error("invalid bind address '{0}'")]
    InvalidBindAddr(String),

    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),
}

/// Failure of the telemetry sink. Always recoverable.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry store unavailable: {0}")]
    Unavailable(String),

    #[error("telemetry write rejected: {0}")]
    Rejected(String),
}

/// Outcome of the admission pre-phase when a request must not proceed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("rate limit exceeded for {label}")]
    LimitExceeded {
        /// Counter label that denied the request
        label: String,
        /// Time until the denying window resets
        retry_after: Duration,
    },
}

impl AdmissionError {
    pub fn retry_after(&self) -> Duration {
        match self {
            AdmissionError::LimitExceeded { retry_after, .. } => *retry_after,
        }
    }

    /// Retry hint in whole seconds, rounded up so clients never retry
    /// inside the window.
    pub fn retry_after_secs(&self) -> u64 {
        let retry_after = self.retry_after();
        retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)
    }
}

/// Failure to assemble the service.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}
