//! Photobooth Release Proxy
//!
//! Relays the marketing site's API calls to the release backend: login,
//! aggregated version info, per-kind changelogs, binary downloads and the
//! streaming release upload with its server-sent-event progress feed.
//!
//! Storage, version bookkeeping and authentication all live in the backend;
//! this crate only forwards requests and reshapes responses, degrading to
//! neutral payloads when the backend is unreachable.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::debug;

pub mod config;
pub mod error;
pub mod handlers;
pub mod relay;
pub mod service;
pub mod types;
pub mod utils;

use service::ProxyState;

/// Create the axum router
pub fn create_router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/api/auth/login", post(handlers::login_handler))
        .route("/api/version", get(handlers::get_version_handler))
        .route(
            "/api/versions/changelog",
            get(handlers::get_changelog_handler),
        )
        .route("/api/download", get(handlers::download_handler))
        // Multipart upload relay, answers with an event stream
        .route("/api/releases", post(handlers::upload_release_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Initialize the release proxy and return the router
pub fn init_release_proxy(config: ProxyConfig) -> Result<Router> {
    debug!(
        "Initializing release proxy for backend {}",
        config.backend_url
    );

    let state = Arc::new(ProxyState::new(config).context("Failed to create proxy state")?);

    Ok(create_router(state))
}

// Re-export commonly used types
pub use config::{ProxyConfig, SilencePolicy};
pub use error::{ErrorResponse, ProxyError};
pub use service::BackendClient;
