// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Periodic housekeeping: telemetry retention and counter cleanup.

use crate::clock::{self, SharedClock};
use crate::counter::UsageCounter;
use crate::telemetry::BehaviorStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// State the maintenance loop works on.
#[derive(Clone)]
pub struct Maintenance {
    store: Arc<dyn BehaviorStore>,
    counter: Arc<dyn UsageCounter>,
    clock: SharedClock,
    retention: Duration,
}

impl Maintenance {
    pub fn new(
        store: Arc<dyn BehaviorStore>,
        counter: Arc<dyn UsageCounter>,
        clock: SharedClock,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            counter,
            clock,
            retention,
        }
    }

    /// One pass. Returns the number of telemetry events pruned.
    pub async fn run_once(&self) -> usize {
        let cutoff = clock::lookback(self.clock.now(), self.retention);

        let pruned = match self.store.prune(cutoff).await {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "Telemetry prune failed");
                0
            }
        };
        self.counter.cleanup().await;

        debug!(pruned, %cutoff, "Maintenance pass complete");
        pruned
    }

    /// Run [`Maintenance::run_once`] every `interval` until the task is aborted.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
