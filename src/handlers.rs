// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the admission sidecar.
//!
//! Applications that cannot embed the [`enforce`](crate::gate::enforce)
//! middleware call `/check` before handling a request and `/track` after
//! responding.

use crate::cache::{Cache, CacheStats};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::counter::{FixedWindowCounter, UsageCounter};
use crate::criteria::{self, Badge, Challenge, ChallengeProgress, UserStats};
use crate::error::StartupError;
use crate::gate::{AdmissionGate, ErrorResponse, ResponseMeta};
use crate::identity::{self, Identity, RequestContext};
use crate::maintenance::Maintenance;
use crate::metrics::AdmissionMetrics;
use crate::policy::{parse_limits, EffectiveLimits, LimitPolicy, ReportedReputation};
use crate::scoring::ScoreEngine;
use crate::telemetry::{BehaviorStore, MemoryBehaviorStore, TelemetryRecorder};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a computed identity profile is served from the cache.
pub const PROFILE_TTL: Duration = Duration::from_secs(30);

/// Shared application state.
pub struct AppState {
    pub gate: Arc<AdmissionGate>,
    pub profiles: Cache<IdentityProfile>,
    pub store: Arc<dyn BehaviorStore>,
    pub counter: Arc<dyn UsageCounter>,
    pub reputation: Arc<ReportedReputation>,
    pub metrics: AdmissionMetrics,
    pub clock: SharedClock,
    pub badges: Vec<Badge>,
    pub challenges: Vec<Challenge>,
    pub config: Config,
}

impl AppState {
    /// Assemble the service on the system clock.
    pub fn new(config: Config) -> Result<Self, StartupError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Assemble the service. Every configuration error surfaces here.
    pub fn with_clock(config: Config, clock: SharedClock) -> Result<Self, StartupError> {
        config.validate()?;

        let metrics = AdmissionMetrics::new()?;
        let store: Arc<dyn BehaviorStore> = Arc::new(MemoryBehaviorStore::new());
        let counter: Arc<dyn UsageCounter> = Arc::new(FixedWindowCounter::new(clock.clone()));
        let reputation = Arc::new(ReportedReputation::with_clock(
            &config.limits.reputation_cache(),
            clock.clone(),
        )?);
        let policy = LimitPolicy::from_config(config.limits.endpoint_overrides.as_ref())?;
        let profiles = Cache::with_clock(&config.cache, clock.clone())?;

        let gate = AdmissionGate::new(
            ScoreEngine::new(store.clone(), clock.clone(), config.telemetry.window()),
            policy,
            counter.clone(),
            reputation.clone(),
            TelemetryRecorder::new(store.clone(), metrics.clone()),
            metrics.clone(),
            clock.clone(),
        );

        Ok(Self {
            gate: Arc::new(gate),
            profiles,
            store,
            counter,
            reputation,
            metrics,
            clock,
            badges: criteria::default_badges(),
            challenges: criteria::default_challenges(),
            config,
        })
    }

    /// Housekeeping bound to this state's store and counters.
    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(
            self.store.clone(),
            self.counter.clone(),
            self.clock.clone(),
            self.config.telemetry.retention(),
        )
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Admission check for a request described by the caller.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    pub endpoint: String,
    /// Static limits such as `"10 per minute"` applied alongside the
    /// dynamic ones
    #[serde(default)]
    pub fallback: Vec<String>,
    /// Current reputation of the subject, if the caller knows it
    #[serde(default)]
    pub reputation: Option<i64>,
}

/// Admission check response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    pub identity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_score: Option<u8>,
}

/// Post-response telemetry for a finished request.
#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspicion: Option<u8>,
}

/// Statistics of a user to evaluate against the award catalogue.
#[derive(Debug, Deserialize)]
pub struct AwardsRequest {
    pub stats: UserStats,
    #[serde(default)]
    pub held_badges: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AwardsResponse {
    pub new_badges: Vec<String>,
    pub challenges: Vec<ChallengeProgress>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Behavior score and limits currently in force for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityProfile {
    pub identity: String,
    pub endpoint: Option<String>,
    pub behavior_score: u8,
    pub limits: EffectiveLimits,
}

fn bad_request(error: String, code: &'static str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error,
            code,
            retry_after_secs: None,
        }),
    )
        .into_response()
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "civic-admission",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run the admission pre-phase for a described request.
///
/// Limited requests still answer 200 so a proxy can read the body.
pub async fn check(State(state): State<Arc<AppState>>, Json(req): Json<CheckRequest>) -> Response {
    let fallback = match parse_limits(&req.fallback) {
        Ok(items) => items,
        Err(err) => {
            warn!(endpoint = %req.endpoint, error = %err, "Rejected fallback limits");
            return bad_request(err.to_string(), "INVALID_LIMIT");
        }
    };

    let identity = identity::resolve(&RequestContext::new(req.subject_id, req.ip));
    if let (true, Some(points)) = (identity.is_user(), req.reputation) {
        state.reputation.set(identity.key.clone(), points);
    }
    debug!(identity = %identity, endpoint = %req.endpoint, "Processing admission check");

    let response = match state
        .gate
        .admit_identity(identity.clone(), &req.endpoint, &fallback)
        .await
    {
        Ok(admission) => CheckResponse {
            allowed: true,
            identity: identity.to_string(),
            reason: None,
            retry_after_secs: None,
            remaining: Some(admission.remaining),
            behavior_score: Some(admission.behavior_score),
        },
        Err(err) => CheckResponse {
            allowed: false,
            identity: identity.to_string(),
            reason: Some(err.to_string()),
            retry_after_secs: Some(err.retry_after_secs()),
            remaining: None,
            behavior_score: None,
        },
    };
    Json(response).into_response()
}

/// Run the post-phase for a request the caller has finished.
pub async fn track(State(state): State<Arc<AppState>>, Json(req): Json<TrackRequest>) -> Json<TrackResponse> {
    let identity = identity::resolve(&RequestContext::new(req.subject_id, req.ip));
    let meta = ResponseMeta {
        endpoint: req.endpoint,
        method: req.method,
        status: req.status,
        user_agent: req.user_agent,
    };

    let suspicion = state.gate.track(&identity, &meta).await;
    Json(TrackResponse {
        recorded: suspicion.is_some(),
        suspicion,
    })
}

/// Current behavior profile of an identity key (`user:<id>` or `ip:<addr>`),
/// served from the cache for [`PROFILE_TTL`].
pub async fn profile(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(query): Query<ProfileQuery>,
) -> Response {
    let identity: Identity = match key.parse() {
        Ok(identity) => identity,
        Err(err) => return bad_request(err, "INVALID_IDENTITY"),
    };

    let endpoint = query.endpoint.filter(|e| !e.is_empty());
    let cache_key = format!("profile:{}:{}", identity, endpoint.as_deref().unwrap_or(""));
    let profile = state
        .profiles
        .get_or_insert_with(&cache_key, Some(PROFILE_TTL), || async {
            let (behavior_score, limits) = state
                .gate
                .profile(&identity, endpoint.as_deref().unwrap_or(""))
                .await;
            IdentityProfile {
                identity: identity.to_string(),
                endpoint: endpoint.clone(),
                behavior_score,
                limits,
            }
        })
        .await;
    Json(profile).into_response()
}

/// Badges newly earned and challenge progress for a user's statistics.
pub async fn awards(State(state): State<Arc<AppState>>, Json(req): Json<AwardsRequest>) -> Json<AwardsResponse> {
    let new_badges = criteria::earned_badges(&state.badges, &req.held_badges, &req.stats)
        .into_iter()
        .map(|badge| badge.name.clone())
        .collect();
    let challenges = state
        .challenges
        .iter()
        .map(|challenge| challenge.progress(&req.stats))
        .collect();
    Json(AwardsResponse {
        new_badges,
        challenges,
    })
}

/// Cache statistics, also published to the metrics registry.
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    let stats = state.profiles.stats();
    state.metrics.observe_cache(&stats);
    Json(stats)
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    state.metrics.observe_cache(&state.profiles.stats());
    match state.metrics.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Build the sidecar router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/check", post(check))
        .route("/track", post(track))
        .route("/identities/:key/profile", get(profile))
        .route("/awards/evaluate", post(awards))
        .route("/cache/stats", get(cache_stats));

    if state.config.metrics.enabled {
        info!(path = %state.config.metrics.path, "Metrics endpoint enabled");
        app = app.route(&state.config.metrics.path, get(metrics));
    }

    app.with_state(state)
}
