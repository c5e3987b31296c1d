// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for admission decisions, telemetry health and cache
//! effectiveness.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `civic_admission_decisions_total` | Counter | `endpoint`, `outcome` |
//! | `civic_admission_telemetry_failures_total` | Counter | |
//! | `civic_admission_cache` | Gauge | `stat` |

use crate::cache::CacheStats;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use thiserror::Error;

/// Label values longer than this are truncated.
pub const MAX_LABEL_VALUE_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Admission metrics bound to their own registry. Cheap to clone.
#[derive(Clone)]
pub struct AdmissionMetrics {
    registry: Arc<Registry>,
    decisions: IntCounterVec,
    telemetry_failures: IntCounter,
    cache: IntGaugeVec,
}

impl AdmissionMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let decisions = IntCounterVec::new(
            Opts::new(
                "civic_admission_decisions_total",
                "Admission decisions by endpoint and outcome",
            ),
            &["endpoint", "outcome"],
        )?;
        let telemetry_failures = IntCounter::new(
            "civic_admission_telemetry_failures_total",
            "Telemetry writes that failed and were discarded",
        )?;
        let cache = IntGaugeVec::new(
            Opts::new("civic_admission_cache", "Cache statistics snapshot"),
            &["stat"],
        )?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(telemetry_failures.clone()))?;
        registry.register(Box::new(cache.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            decisions,
            telemetry_failures,
            cache,
        })
    }

    pub fn admitted(&self, endpoint: &str) {
        self.decisions
            .with_label_values(&[truncate_label(endpoint), "allowed"])
            .inc();
    }

    pub fn rejected(&self, endpoint: &str) {
        self.decisions
            .with_label_values(&[truncate_label(endpoint), "limited"])
            .inc();
    }

    pub fn telemetry_write_failed(&self) {
        self.telemetry_failures.inc();
    }

    pub fn telemetry_failures(&self) -> u64 {
        self.telemetry_failures.get()
    }

    pub fn decisions(&self, endpoint: &str, outcome: &str) -> u64 {
        self.decisions
            .with_label_values(&[truncate_label(endpoint), outcome])
            .get()
    }

    /// Publish a cache snapshot into the gauges.
    pub fn observe_cache(&self, stats: &CacheStats) {
        let pairs = [
            ("hits", stats.hits as i64),
            ("misses", stats.misses as i64),
            ("evictions", stats.evictions as i64),
            ("sets", stats.sets as i64),
            ("size", stats.current_size as i64),
            ("max_size", stats.max_size as i64),
        ];
        for (stat, value) in pairs {
            self.cache.with_label_values(&[stat]).set(value);
        }
    }

    /// Render all metrics in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

fn truncate_label(value: &str) -> &str {
    if value.len() <= MAX_LABEL_VALUE_LEN {
        return value;
    }
    let mut end = MAX_LABEL_VALUE_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
