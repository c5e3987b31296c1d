// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Admission gate and its axum middleware.
//!
//! The gate runs in two phases around a handler:
//!
//! - **pre-phase**: resolve identity, score recent behavior, resolve
//!   effective limits and check every period against the usage counters;
//! - **post-phase**: score the finished request and append it to the
//!   telemetry log when it is worth keeping.
//!
//! The post-phase also runs for rejected requests, so an identity that
//! keeps hitting its limits accumulates failures in its behavior score.

use crate::clock::SharedClock;
use crate::counter::{CounterDecision, UsageCounter};
use crate::error::{AdmissionError, ConfigError};
use crate::identity::{self, AuthenticatedSubject, Identity, RequestContext};
use crate::metrics::AdmissionMetrics;
use crate::policy::{parse_limits, EffectiveLimits, LimitPolicy, RateLimitItem, ReputationSource};
use crate::scoring::{compute_suspicion, ScoreEngine};
use crate::telemetry::{should_track, RequestEvent, TelemetryRecorder};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A request that passed the pre-phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub identity: Identity,
    pub behavior_score: u8,
    pub limits: EffectiveLimits,
    /// Smallest number of requests left across all checked periods
    pub remaining: u32,
}

/// What the post-phase needs to know about a finished request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    pub user_agent: Option<String>,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Behavior-aware admission control.
pub struct AdmissionGate {
    engine: ScoreEngine,
    policy: LimitPolicy,
    counter: Arc<dyn UsageCounter>,
    reputation: Arc<dyn ReputationSource>,
    recorder: TelemetryRecorder,
    metrics: AdmissionMetrics,
    clock: SharedClock,
}

impl AdmissionGate {
    pub fn new(
        engine: ScoreEngine,
        policy: LimitPolicy,
        counter: Arc<dyn UsageCounter>,
        reputation: Arc<dyn ReputationSource>,
        recorder: TelemetryRecorder,
        metrics: AdmissionMetrics,
        clock: SharedClock,
    ) -> Self {
        Self {
            engine,
            policy,
            counter,
            reputation,
            recorder,
            metrics,
            clock,
        }
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    pub fn counter(&self) -> &Arc<dyn UsageCounter> {
        &self.counter
    }

    /// Behavior score and effective limits for an identity, without
    /// touching any counter.
    pub async fn profile(&self, identity: &Identity, endpoint: &str) -> (u8, EffectiveLimits) {
        let score = self.engine.behavior_score(identity).await;
        let reputation = self
            .policy
            .reputation_for(identity, self.reputation.as_ref())
            .await;
        (score, self.policy.resolve(score, reputation, endpoint))
    }

    /// Pre-phase for a request context.
    pub async fn admit(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
        fallback: &[RateLimitItem],
    ) -> Result<Admission, AdmissionError> {
        let identity = identity::resolve(ctx);
        self.admit_identity(identity, endpoint, fallback).await
    }

    /// Pre-phase for an already resolved identity.
    ///
    /// Every period is checked even after one denies, so all counters see
    /// the attempt consistently.
    pub async fn admit_identity(
        &self,
        identity: Identity,
        endpoint: &str,
        fallback: &[RateLimitItem],
    ) -> Result<Admission, AdmissionError> {
        let (score, limits) = self.profile(&identity, endpoint).await;
        let counter_key = identity.to_string();

        let dynamic = limits
            .iter()
            .map(|(period, limit)| (format!("{endpoint}:{period}"), period, limit));
        let static_limits = fallback
            .iter()
            .map(|item| (format!("{endpoint}:default:{}", item.period), item.period, item.amount));

        let mut remaining = u32::MAX;
        let mut denied: Option<(String, Duration)> = None;

        for (label, period, limit) in dynamic.chain(static_limits) {
            match self.counter.check(&counter_key, &label, period, limit).await {
                CounterDecision::Allow { remaining: left } => remaining = remaining.min(left),
                CounterDecision::Deny { retry_after } => {
                    let longer = denied.as_ref().map_or(true, |(_, current)| retry_after > *current);
                    if longer {
                        denied = Some((label, retry_after));
                    }
                }
            }
        }

        if let Some((label, retry_after)) = denied {
            self.metrics.rejected(endpoint);
            info!(
                identity = %identity,
                endpoint,
                behavior_score = score,
                label = %label,
                retry_after_secs = retry_after.as_secs(),
                "Request rate limited"
            );
            return Err(AdmissionError::LimitExceeded { label, retry_after });
        }

        self.metrics.admitted(endpoint);
        debug!(identity = %identity, endpoint, behavior_score = score, remaining, "Request admitted");
        Ok(Admission {
            identity,
            behavior_score: score,
            limits,
            remaining,
        })
    }

    fn event_for(&self, identity: &Identity, meta: &ResponseMeta) -> Option<RequestEvent> {
        if !should_track(&meta.endpoint, &meta.method, meta.status) {
            return None;
        }
        let suspicion = compute_suspicion(
            &meta.endpoint,
            &meta.method,
            meta.status,
            meta.user_agent.as_deref(),
        );
        Some(RequestEvent {
            identity_key: identity.to_string(),
            endpoint: meta.endpoint.clone(),
            method: meta.method.to_ascii_uppercase(),
            status: meta.status,
            user_agent: meta.user_agent.clone(),
            suspicion,
            timestamp: self.clock.now(),
        })
    }

    /// Post-phase, awaited. Returns the suspicion score if the request was
    /// recorded.
    pub async fn track(&self, identity: &Identity, meta: &ResponseMeta) -> Option<u8> {
        let event = self.event_for(identity, meta)?;
        let suspicion = event.suspicion;
        self.recorder.record(event).await;
        Some(suspicion)
    }

    /// Post-phase, fire-and-forget. Never delays the response.
    pub fn observe(&self, identity: &Identity, meta: &ResponseMeta) {
        if let Some(event) = self.event_for(identity, meta) {
            self.recorder.record_detached(event);
        }
    }

    /// Bind the gate to one endpoint with fallback static limits such as
    /// `"10 per minute"`. Malformed limits are rejected here, before the
    /// route serves traffic.
    pub fn guard<S: AsRef<str>>(
        self: &Arc<Self>,
        endpoint: impl Into<String>,
        fallback: &[S],
    ) -> Result<EndpointGuard, ConfigError> {
        let endpoint: String = endpoint.into();
        Ok(EndpointGuard {
            gate: Arc::clone(self),
            endpoint: Arc::from(endpoint),
            fallback: Arc::from(parse_limits(fallback)?),
        })
    }
}

/// Middleware state binding a gate to an endpoint id.
#[derive(Clone)]
pub struct EndpointGuard {
    gate: Arc<AdmissionGate>,
    endpoint: Arc<str>,
    fallback: Arc<[RateLimitItem]>,
}

impl EndpointGuard {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Build the request context from extensions set by upstream layers.
pub fn request_context(request: &Request) -> RequestContext {
    let subject_id = request
        .extensions()
        .get::<AuthenticatedSubject>()
        .map(|s| s.0.clone());
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    RequestContext::new(subject_id, remote_addr)
}

fn user_agent(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// 429 response with a retry hint.
pub fn rate_limited_response(err: &AdmissionError) -> Response {
    let retry_secs = err.retry_after_secs();
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_secs.to_string())],
        Json(ErrorResponse {
            error: "Too many requests, please try again later".to_string(),
            code: "RATE_LIMITED",
            retry_after_secs: Some(retry_secs),
        }),
    )
        .into_response()
}

/// Admission middleware: pre-phase check, handler, post-phase telemetry.
///
/// ```rust,ignore
/// let guard = gate.guard(endpoints::LOGIN, &["10 per minute"])?;
/// let app = Router::new()
///     .route("/login", post(login))
///     .route_layer(middleware::from_fn_with_state(guard, enforce));
/// ```
pub async fn enforce(State(guard): State<EndpointGuard>, request: Request, next: Next) -> Response {
    let ctx = request_context(&request);
    let identity = identity::resolve(&ctx);
    let method = request.method().to_string();
    let ua = user_agent(&request);

    let response = match guard
        .gate
        .admit_identity(identity.clone(), &guard.endpoint, &guard.fallback)
        .await
    {
        Ok(admission) => {
            let mut response = next.run(request).await;
            if let Ok(value) = admission.remaining.to_string().parse() {
                response.headers_mut().insert("x-ratelimit-remaining", value);
            }
            response
        }
        Err(err) => rate_limited_response(&err),
    };

    guard.gate.observe(
        &identity,
        &ResponseMeta {
            endpoint: guard.endpoint.to_string(),
            method,
            status: response.status().as_u16(),
            user_agent: ua,
        },
    );
    response
}

/// Telemetry-only middleware for routes that are not gated.
pub async fn track(State(guard): State<EndpointGuard>, request: Request, next: Next) -> Response {
    let identity = identity::resolve(&request_context(&request));
    let method = request.method().to_string();
    let ua = user_agent(&request);

    let response = next.run(request).await;
    guard.gate.observe(
        &identity,
        &ResponseMeta {
            endpoint: guard.endpoint.to_string(),
            method,
            status: response.status().as_u16(),
            user_agent: ua,
        },
    );
    response
}
