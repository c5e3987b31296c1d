// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Behavior telemetry: the append-only log of tracked requests.
//!
//! Recording is best-effort. A failing store is logged and counted, never
//! surfaced to the request that produced the event.

use crate::endpoints;
use crate::error::TelemetryError;
use crate::metrics::AdmissionMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// One tracked request. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub identity_key: String,
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    pub user_agent: Option<String>,
    pub suspicion: u8,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate of one identity's events inside a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowStats {
    pub count: u64,
    pub suspicion_sum: u64,
    pub distinct_endpoints: u64,
    pub distinct_methods: u64,
    /// Events with status >= 400
    pub failures: u64,
}

impl WindowStats {
    pub fn mean_suspicion(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.suspicion_sum as f64 / self.count as f64
        }
    }

    /// Fold a sequence of events into window statistics.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a RequestEvent>) -> Self {
        let mut stats = WindowStats::default();
        let mut endpoints = HashSet::new();
        let mut methods = HashSet::new();

        for event in events {
            stats.count += 1;
            stats.suspicion_sum += u64::from(event.suspicion);
            if event.status >= 400 {
                stats.failures += 1;
            }
            endpoints.insert(event.endpoint.as_str());
            methods.insert(event.method.as_str());
        }

        stats.distinct_endpoints = endpoints.len() as u64;
        stats.distinct_methods = methods.len() as u64;
        stats
    }
}

/// Persistent telemetry sink.
///
/// Implementations backed by external storage must enforce their own
/// timeouts; callers never cancel these operations.
#[async_trait]
pub trait BehaviorStore: Send + Sync {
    /// Append one event.
    async fn append(&self, event: RequestEvent) -> Result<(), TelemetryError>;

    /// Aggregate the identity's events with `timestamp >= since`.
    async fn window_stats(
        &self,
        identity_key: &str,
        since: DateTime<Utc>,
    ) -> Result<WindowStats, TelemetryError>;

    /// Drop events older than `before`. Returns the number removed.
    async fn prune(&self, before: DateTime<Utc>) -> Result<usize, TelemetryError>;
}

/// In-process store keeping each identity's events in arrival order.
#[derive(Debug, Default)]
pub struct MemoryBehaviorStore {
    events: RwLock<HashMap<String, VecDeque<RequestEvent>>>,
}

impl MemoryBehaviorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of retained events.
    pub fn len(&self) -> usize {
        self.events.read().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BehaviorStore for MemoryBehaviorStore {
    async fn append(&self, event: RequestEvent) -> Result<(), TelemetryError> {
        self.events
            .write()
            .entry(event.identity_key.clone())
            .or_default()
            .push_back(event);
        Ok(())
    }

    async fn window_stats(
        &self,
        identity_key: &str,
        since: DateTime<Utc>,
    ) -> Result<WindowStats, TelemetryError> {
        let events = self.events.read();
        let stats = match events.get(identity_key) {
            Some(log) => WindowStats::from_events(log.iter().filter(|e| e.timestamp >= since)),
            None => WindowStats::default(),
        };
        Ok(stats)
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<usize, TelemetryError> {
        let mut events = self.events.write();
        let mut removed = 0;
        events.retain(|_, log| {
            let len = log.len();
            log.retain(|e| e.timestamp >= before);
            removed += len - log.len();
            !log.is_empty()
        });
        Ok(removed)
    }
}

/// Whether a request should be added to the telemetry log.
///
/// Bounds telemetry growth: successful page views are skipped, writes,
/// failures and authentication traffic are kept.
pub fn should_track(endpoint: &str, method: &str, status: u16) -> bool {
    let method = method.to_ascii_uppercase();

    if endpoints::UNTRACKED_PAGES.contains(&endpoint) && method == "GET" && status == 200 {
        return false;
    }

    if matches!(method.as_str(), "POST" | "PUT" | "DELETE") {
        return true;
    }

    if status >= 400 {
        return true;
    }

    endpoints::AUTH_FLOW.contains(&endpoint)
}

/// Best-effort writer in front of a [`BehaviorStore`].
#[derive(Clone)]
pub struct TelemetryRecorder {
    store: Arc<dyn BehaviorStore>,
    metrics: AdmissionMetrics,
}

impl TelemetryRecorder {
    pub fn new(store: Arc<dyn BehaviorStore>, metrics: AdmissionMetrics) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &Arc<dyn BehaviorStore> {
        &self.store
    }

    /// Append an event, swallowing and logging any failure.
    pub async fn record(&self, event: RequestEvent) {
        let identity = event.identity_key.clone();
        let endpoint = event.endpoint.clone();
        match self.store.append(event).await {
            Ok(()) => debug!(%identity, %endpoint, "Recorded request telemetry"),
            Err(err) => {
                self.metrics.telemetry_write_failed();
                warn!(%identity, %endpoint, error = %err, "Failed to record request telemetry");
            }
        }
    }

    /// Record without waiting, on the current tokio runtime.
    pub fn record_detached(&self, event: RequestEvent) {
        let recorder = self.clone();
        tokio::spawn(async move {
            recorder.record(event).await;
        });
    }
}
