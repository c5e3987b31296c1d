// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-identity usage counters.
//!
//! The admission gate only depends on [`UsageCounter`]; the fixed-window
//! implementation here covers single-process deployments.

use crate::clock::{SharedClock, SystemClock};
use crate::policy::Period;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Result of a counter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDecision {
    /// Request counted
    Allow {
        /// Requests left in the current window
        remaining: u32,
    },
    /// Limit reached
    Deny {
        /// Time until the window resets
        retry_after: Duration,
    },
}

impl CounterDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CounterDecision::Allow { .. })
    }
}

/// Counting primitive: `check(identity, period_label, limit) -> allow|deny`.
#[async_trait]
pub trait UsageCounter: Send + Sync {
    /// Count one request against `limit` for the labelled period, or deny
    /// without counting if the limit is already reached.
    async fn check(&self, identity: &str, label: &str, period: Period, limit: u32) -> CounterDecision;

    /// Drop state for windows that have ended.
    async fn cleanup(&self);
}

#[derive(Debug)]
struct Window {
    started: DateTime<Utc>,
    length: Duration,
    count: u32,
}

impl Window {
    fn ends(&self) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.length) {
            Ok(length) => self.started + length,
            Err(_) => DateTime::<Utc>::MAX_UTC,
        }
    }
}

/// Fixed-window counters keyed by identity and label.
pub struct FixedWindowCounter {
    clock: SharedClock,
    windows: Arc<RwLock<HashMap<(String, String), Window>>>,
}

impl Default for FixedWindowCounter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl FixedWindowCounter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of live windows.
    pub async fn len(&self) -> usize {
        self.windows.read().await.len()
    }
}

#[async_trait]
impl UsageCounter for FixedWindowCounter {
    async fn check(&self, identity: &str, label: &str, period: Period, limit: u32) -> CounterDecision {
        let now = self.clock.now();
        let mut windows = self.windows.write().await;
        let window = windows
            .entry((identity.to_string(), label.to_string()))
            .or_insert_with(|| Window {
                started: now,
                length: period.duration(),
                count: 0,
            });

        if now >= window.ends() {
            window.started = now;
            window.length = period.duration();
            window.count = 0;
        }

        if window.count < limit {
            window.count += 1;
            CounterDecision::Allow {
                remaining: limit - window.count,
            }
        } else {
            let retry_after = (window.ends() - now).to_std().unwrap_or(Duration::ZERO);
            debug!(%identity, %label, limit, ?retry_after, "Usage limit reached");
            CounterDecision::Deny { retry_after }
        }
    }

    async fn cleanup(&self) {
        let now = self.clock.now();
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, window| now < window.ends());
        debug!(removed = before - windows.len(), "Cleaned up usage windows");
    }
}
