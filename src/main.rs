// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Civic Admission Service
//!
//! Admission-control sidecar for the civic issue reporting application.
//!
//! ## Usage
//!
//! The application calls `/check` before handling a request and `/track`
//! after responding. Applications written in Rust can embed
//! [`civic_admission::enforce`] as axum middleware instead.
//!
//! ## Configuration
//!
//! Configuration is loaded from an optional JSON file and environment
//! variables:
//!
//! - `CONFIG_PATH`: JSON config file
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `CACHE_MAX_SIZE`: Cache capacity (default: 500)
//! - `CACHE_DEFAULT_TTL_SECS`: Default cache TTL (default: 300)
//! - `BEHAVIOR_WINDOW_SECS`: Behavior scoring window (default: 3600)
//! - `TELEMETRY_RETENTION_SECS`: Telemetry retention (default: 604800)
//! - `MAINTENANCE_INTERVAL_SECS`: Housekeeping interval (default: 60)
//! - `REPUTATION_MAX_ENTRIES`: Reported reputations kept (default: 10000)
//!
//! A variable that is set but does not parse stops startup.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use civic_admission::{
    config::Config,
    handlers::{router, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        cache_max_size = config.cache.max_size,
        window_secs = config.telemetry.window_secs,
        retention_secs = config.telemetry.retention_secs,
        "Starting civic admission service"
    );

    // Create application state
    let state = Arc::new(AppState::new(config.clone())?);

    // Spawn maintenance task
    state
        .maintenance()
        .spawn(config.telemetry.maintenance_interval());

    // Build router
    let app = router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Start server
    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
