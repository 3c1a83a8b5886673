use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use release_models::{ChangelogResponse, PackageKind, VersionSummary};
use serde_json::json;
use tracing::{debug, error, instrument, warn};

use crate::{
    error::{ErrorResponse, ProxyError},
    relay::relay_upload,
    service::ProxyState,
    types::KindQuery,
};

const LOGIN_FAILED: &str = "Login failed";
const DOWNLOAD_FAILED: &str = "Download failed";

/// Headers copied from the backend download response.
const DOWNLOAD_HEADERS: [header::HeaderName; 3] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_DISPOSITION,
];

// ---------------------------------------------------------------------------
// POST /api/auth/login
// ---------------------------------------------------------------------------

/// Forwards credentials; the backend's JSON and status come back unchanged.
#[instrument(skip_all)]
pub async fn login_handler(State(state): State<Arc<ProxyState>>, body: Bytes) -> Response {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Login request body is not JSON: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Invalid login request")),
            )
                .into_response();
        }
    };

    let response = match state.backend.login(&payload).await {
        Ok(response) => response,
        Err(e) => {
            error!("Login relay failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(LOGIN_FAILED)),
            )
                .into_response();
        }
    };

    let status = response.status();
    match response.json::<serde_json::Value>().await {
        Ok(body) => {
            debug!(%status, "Login relayed");
            (status, Json(body)).into_response()
        }
        Err(e) => {
            warn!(%status, "Login response was not JSON: {}", e);
            let status = if status.is_success() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                status
            };
            (status, Json(ErrorResponse::new(LOGIN_FAILED))).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/version
// ---------------------------------------------------------------------------

/// Always answers 200; each kind degrades to `null` on its own.
#[instrument(skip_all)]
pub async fn get_version_handler(State(state): State<Arc<ProxyState>>) -> Json<VersionSummary> {
    let (installer, vm) = tokio::join!(
        state.backend.latest(PackageKind::Installer),
        state.backend.latest(PackageKind::Vm),
    );

    let installer = installer
        .inspect_err(|e| warn!("Installer version lookup failed: {}", e))
        .ok();
    let vm = vm
        .inspect_err(|e| warn!("VM version lookup failed: {}", e))
        .ok();

    let summary = VersionSummary::from_releases(installer, vm);
    debug!(
        version = ?summary.version,
        vm_version = ?summary.vm_version,
        "Version summary ready"
    );
    Json(summary)
}

// ---------------------------------------------------------------------------
// GET /api/versions/changelog?type=
// ---------------------------------------------------------------------------

#[instrument(skip(state), fields(kind = ?params.kind))]
pub async fn get_changelog_handler(
    State(state): State<Arc<ProxyState>>,
    Query(params): Query<KindQuery>,
) -> Result<Json<ChangelogResponse>, ProxyError> {
    let kind = params.package_kind()?;

    match state.backend.changelog(kind).await {
        Ok(changelog) => {
            debug!("Changelog for {}: {} entries", kind, changelog.len());
            Ok(Json(ChangelogResponse { kind, changelog }))
        }
        Err(e) => {
            warn!("Changelog lookup for {} failed: {}", kind, e);
            Ok(Json(ChangelogResponse::empty(kind)))
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/download?type=
// ---------------------------------------------------------------------------

/// Streams the binary through with its content headers.
#[instrument(skip(state), fields(kind = ?params.kind))]
pub async fn download_handler(
    State(state): State<Arc<ProxyState>>,
    Query(params): Query<KindQuery>,
) -> Result<Response, ProxyError> {
    let kind = params.package_kind()?;
    let response = state.backend.download(kind).await?;

    let status = response.status();
    if !status.is_success() {
        warn!(%status, "Backend refused {} download", kind);
        let body = response
            .json::<serde_json::Value>()
            .await
            .unwrap_or_else(|_| json!({ "error": DOWNLOAD_FAILED }));
        return Ok((status, Json(body)).into_response());
    }

    let mut headers = HeaderMap::new();
    for name in DOWNLOAD_HEADERS {
        if let Some(value) = response.headers().get(&name) {
            headers.insert(name, value.clone());
        }
    }
    debug!(?headers, "Streaming {} download", kind);

    Ok((
        StatusCode::OK,
        headers,
        Body::from_stream(response.bytes_stream()),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// POST /api/releases
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn upload_release_handler(
    State(state): State<Arc<ProxyState>>,
    request: Request,
) -> Response {
    relay_upload(&state, request).await
}

#[cfg(test)]
mod tests {
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ProxyConfig;

    /// Nothing listens on the discard port, so every backend call fails fast.
    fn unreachable_state() -> Arc<ProxyState> {
        let config = ProxyConfig::from_lookup(|key| {
            (key == "BACKEND_URL").then(|| "http://127.0.0.1:9".to_string())
        })
        .unwrap();
        Arc::new(ProxyState::new(config).unwrap())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn changelog_rejects_unknown_kind() {
        let app = crate::create_router(unreachable_state());

        for uri in [
            "/api/versions/changelog?type=msi",
            "/api/versions/changelog?type=",
            "/api/versions/changelog",
        ] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn download_rejects_unknown_kind() {
        let app = crate::create_router(unreachable_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/download?type=VM")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Query param 'type' must be 'installer' or 'vm'");
    }

    #[tokio::test]
    async fn version_degrades_when_backend_is_down() {
        let app = crate::create_router(unreachable_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/version")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["version"].is_null());
        assert!(body["vm_version"].is_null());
        assert_eq!(body["name"], release_models::DISPLAY_NAME);
        assert_eq!(body["has_download"], false);
    }

    #[tokio::test]
    async fn changelog_degrades_when_backend_is_down() {
        let app = crate::create_router(unreachable_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/versions/changelog?type=vm")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body, json!({ "type": "vm", "changelog": [] }));
    }

    #[tokio::test]
    async fn login_failure_is_500_when_backend_is_down() {
        let app = crate::create_router(unreachable_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/login")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"email":"a@b.c","password":"x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], LOGIN_FAILED);
    }

    #[tokio::test]
    async fn upload_to_unreachable_backend_emits_error_record() {
        let app = crate::create_router(unreachable_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/releases")
                    .header("content-type", "multipart/form-data; boundary=x")
                    .body(Body::from("--x--\r\n"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            crate::relay::EVENT_STREAM
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let records = release_models::EventStreamDecoder::new().push(&bytes);
        assert_eq!(records.len(), 1);
        assert!(matches!(
            &records[0],
            release_models::DecodedRecord::Event(release_models::ProgressEvent::Error { .. })
        ));
    }
}
