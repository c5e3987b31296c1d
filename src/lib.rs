// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Civic Admission
//!
//! Behavior-aware admission control for the civic issue reporting service:
//!
//! - Identity resolution (signed-in subject, else network origin)
//! - Per-request suspicion scoring and windowed behavior scoring
//! - Dynamic per-minute / per-hour / per-day limits with endpoint overrides
//! - Axum middleware with a pre-phase check and a post-phase telemetry write
//! - Bounded TTL cache with LRU eviction
//! - Typed gamification criteria

pub mod cache;
pub mod clock;
pub mod config;
pub mod counter;
pub mod criteria;
pub mod endpoints;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod identity;
pub mod maintenance;
pub mod metrics;
pub mod policy;
pub mod scoring;
pub mod telemetry;

pub use cache::{Cache, CacheStats};
pub use config::Config;
pub use error::{AdmissionError, ConfigError, StartupError, TelemetryError};
pub use gate::{enforce, track, AdmissionGate, EndpointGuard};
pub use identity::{AuthenticatedSubject, Identity, RequestContext};
pub use policy::{EffectiveLimits, LimitPolicy, RateLimitItem};
pub use scoring::{aggregate_score, compute_suspicion};
pub use telemetry::should_track;
