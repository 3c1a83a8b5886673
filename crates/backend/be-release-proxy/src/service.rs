//! Backend client and shared proxy state

use axum::http::{HeaderValue, header};
use release_models::{ChangelogEntry, LatestRelease, PackageKind};
use reqwest::{Client, Response};
use tracing::{debug, instrument};
use url::Url;

use crate::{config::ProxyConfig, error::ProxyError, types::BackendChangelog};

pub const LOGIN_PATH: &str = "api/auth/login";
pub const LATEST_VERSION_PATH: &str = "api/versions/latest";
pub const CHANGELOG_PATH: &str = "api/versions/changelog";
pub const DOWNLOAD_PATH: &str = "api/releases/download";
pub const UPLOAD_PATH: &str = "api/releases";

/// State shared by every handler. Immutable after startup.
pub struct ProxyState {
    pub config: ProxyConfig,
    pub backend: BackendClient,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let backend = BackendClient::new(&config)?;
        Ok(Self { config, backend })
    }
}

/// Thin HTTP client for the release backend. Builds URLs and (de)serializes
/// JSON, nothing more.
#[derive(Clone, Debug)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
    request_timeout: std::time::Duration,
}

impl BackendClient {
    pub fn new(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.backend_url.clone(),
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` against the backend base, optionally adding `?type=`.
    pub fn endpoint(&self, path: &str, kind: Option<PackageKind>) -> Result<Url, ProxyError> {
        let mut url = self.base_url.join(path)?;
        if let Some(kind) = kind {
            url.query_pairs_mut()
                .append_pair("type", kind.backend_literal());
        }
        Ok(url)
    }

    #[instrument(skip_all)]
    pub async fn login(&self, payload: &serde_json::Value) -> Result<Response, ProxyError> {
        let url = self.endpoint(LOGIN_PATH, None)?;
        debug!("Forwarding login to {}", url);

        Ok(self
            .http
            .post(url)
            .timeout(self.request_timeout)
            .json(payload)
            .send()
            .await?)
    }

    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn latest(&self, kind: PackageKind) -> Result<LatestRelease, ProxyError> {
        let url = self.endpoint(LATEST_VERSION_PATH, Some(kind))?;
        debug!("Fetching latest release from {}", url);

        let response = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        debug!("Latest {} release responded with {}", kind, response.status());

        Ok(response.json().await?)
    }

    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn changelog(&self, kind: PackageKind) -> Result<Vec<ChangelogEntry>, ProxyError> {
        let url = self.endpoint(CHANGELOG_PATH, Some(kind))?;
        debug!("Fetching changelog from {}", url);

        let body: BackendChangelog = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(body.changelog)
    }

    /// Starts the download; the body is left unread for streaming. Only the
    /// wait for response headers is bounded by the request timeout.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn download(&self, kind: PackageKind) -> Result<Response, ProxyError> {
        let url = self.endpoint(DOWNLOAD_PATH, Some(kind))?;
        debug!("Requesting download from {}", url);

        tokio::time::timeout(self.request_timeout, self.http.get(url).send())
            .await
            .map_err(|_| ProxyError::Timeout(self.request_timeout))?
            .map_err(ProxyError::from)
    }

    /// Posts an already-encoded multipart body. No total timeout: uploads can
    /// run for minutes and silence is bounded by the relay.
    #[instrument(skip_all)]
    pub async fn upload(
        &self,
        content_type: HeaderValue,
        authorization: Option<HeaderValue>,
        body: reqwest::Body,
    ) -> Result<Response, ProxyError> {
        let url = self.endpoint(UPLOAD_PATH, None)?;
        debug!(authorized = authorization.is_some(), "Relaying upload to {}", url);

        let mut request = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, content_type)
            .body(body);
        if let Some(authorization) = authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }

        Ok(request.send().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> BackendClient {
        let config = ProxyConfig::from_lookup(|key| {
            (key == "BACKEND_URL").then(|| base.to_string())
        })
        .unwrap();
        BackendClient::new(&config).unwrap()
    }

    #[test]
    fn endpoints_keep_base_path() {
        let backend = client("https://api.example.com/booth");
        assert_eq!(
            backend
                .endpoint(CHANGELOG_PATH, Some(PackageKind::Vm))
                .unwrap()
                .as_str(),
            "https://api.example.com/booth/api/versions/changelog?type=vm"
        );
        assert_eq!(
            backend.endpoint(UPLOAD_PATH, None).unwrap().as_str(),
            "https://api.example.com/booth/api/releases"
        );
    }

    #[test]
    fn endpoints_on_bare_host() {
        let backend = client("http://localhost:3001");
        assert_eq!(
            backend
                .endpoint(DOWNLOAD_PATH, Some(PackageKind::Installer))
                .unwrap()
                .as_str(),
            "http://localhost:3001/api/releases/download?type=msi"
        );
    }
}
