use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use axum::{Router, http::HeaderValue};
use be_release_proxy::{ProxyConfig, init_release_proxy};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    services::ServeDir,
};

/// Configuration for running the site server.
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub cors_allowed_origins: Vec<HeaderValue>,
    /// Directory of prebuilt documentation pages, served for any path the
    /// API does not claim.
    pub static_dir: Option<PathBuf>,
    pub proxy: ProxyConfig,
    /// When this receiver gets a value, the server shuts down gracefully.
    pub shutdown: tokio::sync::watch::Receiver<()>,
}

impl ServerConfig {
    pub fn from_env(shutdown: tokio::sync::watch::Receiver<()>) -> Result<Self> {
        let http_addr = std::env::var("HTTP_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse::<SocketAddr>()
            .context("Invalid HTTP_ADDR format")?;

        let cors_allowed_origins = parse_origins(
            &std::env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
        );

        let static_dir = std::env::var("SITE_STATIC_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let proxy = ProxyConfig::from_env().context("Invalid release proxy configuration")?;

        Ok(Self {
            http_addr,
            cors_allowed_origins,
            static_dir,
            proxy,
            shutdown,
        })
    }
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<HeaderValue>().ok()
        })
        .collect()
}

fn build_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Assemble the full site router: release API, health check and, when
/// configured, static documentation.
pub fn build_router(
    proxy: ProxyConfig,
    cors_allowed_origins: Vec<HeaderValue>,
    static_dir: Option<PathBuf>,
) -> Result<Router> {
    let release_router = init_release_proxy(proxy)?;

    let health_route = Router::new().route(
        "/health",
        axum::routing::get(|| async { axum::http::StatusCode::OK }),
    );

    let mut router = release_router.merge(health_route);
    if let Some(dir) = static_dir {
        tracing::info!("Serving static pages from {}", dir.display());
        router = router.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    Ok(router.layer(build_cors(cors_allowed_origins)))
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    tracing::info!("Starting HTTP server at {}", config.http_addr);
    tracing::info!("Relaying release API to {}", config.proxy.backend_url);

    let router = build_router(
        config.proxy,
        config.cors_allowed_origins,
        config.static_dir,
    )?;

    let mut http_shutdown = config.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http_addr))?;

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = http_shutdown.changed().await;
        tracing::info!("Shutting down HTTP server...");
    })
    .await
    .map_err(|e| {
        tracing::error!("HTTP server error: {}", e);
        e.into()
    })
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn origins_skip_blanks_and_invalid_values() {
        let origins = parse_origins("https://booth.example, ,http://localhost:3000,bad\nvalue");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "https://booth.example");
    }

    #[tokio::test]
    async fn health_route_is_ok() {
        let router = build_router(ProxyConfig::default(), Vec::new(), None).unwrap();
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn static_pages_are_served_as_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/guide")).unwrap();
        std::fs::write(dir.path().join("docs/guide/index.html"), "<h1>Getting started</h1>")
            .unwrap();

        let router = build_router(
            ProxyConfig::default(),
            Vec::new(),
            Some(dir.path().to_path_buf()),
        )
        .unwrap();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/docs/guide/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"<h1>Getting started</h1>");

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/docs/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
