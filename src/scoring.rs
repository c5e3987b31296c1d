// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Suspicion scoring.
//!
//! Two scores, both clamped to 0..=100:
//! - a per-request suspicion score from request attributes alone;
//! - an aggregate behavior score from an identity's recent telemetry.

use crate::clock::{self, SharedClock};
use crate::endpoints;
use crate::identity::Identity;
use crate::telemetry::{BehaviorStore, WindowStats};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const MAX_SCORE: u8 = 100;

const STANDARD_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE"];
const AUTOMATION_MARKERS: &[&str] = &["bot", "crawler", "spider", "scraper"];
const MIN_USER_AGENT_LEN: usize = 10;

fn clamp(score: u32) -> u8 {
    score.min(u32::from(MAX_SCORE)) as u8
}

/// Score a single request. Pure: identical inputs give identical scores.
pub fn compute_suspicion(endpoint: &str, method: &str, status: u16, user_agent: Option<&str>) -> u8 {
    let mut score = 0u32;

    if endpoints::CREDENTIAL_CHECKS.contains(&endpoint) && matches!(status, 401 | 403) {
        score += 30;
    }

    if !STANDARD_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
        score += 20;
    }

    match user_agent {
        Some(ua) if ua.chars().count() >= MIN_USER_AGENT_LEN => {}
        _ => score += 15,
    }

    if let Some(ua) = user_agent {
        let ua = ua.to_lowercase();
        if AUTOMATION_MARKERS.iter().any(|marker| ua.contains(marker)) {
            score += 25;
        }
    }

    if endpoints::MUTATING.contains(&endpoint) && status >= 400 {
        score += 10;
    }

    clamp(score)
}

/// Score an identity's windowed behavior. An empty window scores 0.
pub fn aggregate_score(stats: &WindowStats) -> u8 {
    if stats.count == 0 {
        return 0;
    }

    let mut score = 0u32;

    score += match stats.count {
        n if n > 100 => 30,
        n if n > 50 => 15,
        n if n > 20 => 5,
        _ => 0,
    };

    let mean = stats.mean_suspicion();
    if mean > 50.0 {
        score += 25;
    } else if mean > 25.0 {
        score += 10;
    }

    score += match stats.distinct_endpoints {
        n if n > 10 => 20,
        n if n > 5 => 10,
        _ => 0,
    };

    if stats.distinct_methods > 4 {
        score += 15;
    }

    // failures / count > 0.5, kept in integers
    if stats.failures * 2 > stats.count {
        score += 20;
    }

    clamp(score)
}

/// Computes behavior scores from a telemetry store over a trailing window.
#[derive(Clone)]
pub struct ScoreEngine {
    store: Arc<dyn BehaviorStore>,
    clock: SharedClock,
    window: Duration,
}

impl ScoreEngine {
    pub fn new(store: Arc<dyn BehaviorStore>, clock: SharedClock, window: Duration) -> Self {
        Self {
            store,
            clock,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Behavior score for `identity`. Store failures score as 0.
    pub async fn behavior_score(&self, identity: &Identity) -> u8 {
        let key = identity.to_string();
        let since = clock::lookback(self.clock.now(), self.window);

        match self.store.window_stats(&key, since).await {
            Ok(stats) => {
                let score = aggregate_score(&stats);
                debug!(identity = %key, count = stats.count, score, "Computed behavior score");
                score
            }
            Err(err) => {
                warn!(identity = %key, error = %err, "Behavior telemetry unavailable, scoring as neutral");
                0
            }
        }
    }
}
