use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use release_models::ModelError;
use serde::Serialize;
use tracing::{error, warn};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Query param 'type' is required")]
    MissingPackageKind,

    #[error(transparent)]
    InvalidPackageKind(#[from] ModelError),

    #[error("Backend request failed: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("Backend did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid backend URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ProxyError::MissingPackageKind | ProxyError::InvalidPackageKind(_) => {
                warn!("Rejected package kind: {}", self);
                (
                    StatusCode::BAD_REQUEST,
                    "Query param 'type' must be 'installer' or 'vm'",
                )
            }
            ProxyError::Backend(e) => {
                error!("Backend request failed: {}", e);
                (StatusCode::BAD_GATEWAY, "Release service unavailable")
            }
            ProxyError::Timeout(_) => {
                error!("{}", self);
                (StatusCode::GATEWAY_TIMEOUT, "Release service timed out")
            }
            ProxyError::Url(_) | ProxyError::Config(_) => {
                error!("Proxy misconfigured: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}
