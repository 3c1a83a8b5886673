//! HTTP access to the site relay and, for large files, the backend itself

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use release_models::{
    Activity, ChangelogResponse, PackageKind, VersionSummary, error_text, fields,
};
use reqwest::{
    Body, Client, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE},
    multipart::{Form, Part},
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use url::Url;

use crate::{
    controller::{ReleaseTransport, UploadResponse},
    error::AdminError,
    form::ReleaseUpload,
    session::Session,
};

/// Files above this size skip the site relay when a backend URL is known.
pub const DIRECT_UPLOAD_THRESHOLD: u64 = 4 * 1024 * 1024;

const LOGIN_PATH: &str = "api/auth/login";
const VERSION_PATH: &str = "api/version";
const CHANGELOG_PATH: &str = "api/versions/changelog";
const UPLOAD_PATH: &str = "api/releases";
const EVENT_STREAM: &str = "text/event-stream";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(default)]
    email: Option<String>,
}

/// Resolve `path` against `base`, treating `base` as a directory.
fn join(base: &Url, path: &str) -> Result<Url, AdminError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(path)?)
}

/// Short JSON requests against the site.
#[derive(Debug, Clone)]
pub struct SiteClient {
    http: Client,
    site_url: Url,
}

impl SiteClient {
    pub fn new(site_url: Url) -> Result<Self, AdminError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, site_url })
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AdminError> {
        let response = self
            .http
            .post(join(&self.site_url, LOGIN_PATH)?)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            debug!(%status, "Login rejected");
            return Err(AdminError::Rejected(
                error_text(&body).unwrap_or_else(|| "Login failed".into()),
            ));
        }

        let login: LoginResponse =
            serde_json::from_str(&body).map_err(|_| AdminError::Rejected("Login failed".into()))?;
        if login.token.trim().is_empty() {
            return Err(AdminError::Rejected("Login failed".into()));
        }

        Ok(Session::new(
            login.email.unwrap_or_else(|| email.to_string()),
            login.token,
        ))
    }

    pub async fn version(&self) -> Result<VersionSummary, AdminError> {
        let response = self
            .http
            .get(join(&self.site_url, VERSION_PATH)?)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn changelog(&self, kind: PackageKind) -> Result<ChangelogResponse, AdminError> {
        let mut url = join(&self.site_url, CHANGELOG_PATH)?;
        url.query_pairs_mut().append_pair("type", kind.as_str());

        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await?;
            return Err(AdminError::Rejected(
                error_text(&body).unwrap_or_else(|| "Invalid package kind".into()),
            ));
        }
        Ok(response.error_for_status()?.json().await?)
    }
}

/// Streams release files as multipart uploads.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    site_url: Url,
    backend_url: Option<Url>,
    direct_threshold: u64,
}

impl HttpTransport {
    pub fn new(site_url: Url, backend_url: Option<Url>) -> Result<Self, AdminError> {
        // No overall timeout: uploads run as long as progress keeps arriving.
        let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            http,
            site_url,
            backend_url,
            direct_threshold: DIRECT_UPLOAD_THRESHOLD,
        })
    }

    pub fn with_direct_threshold(mut self, bytes: u64) -> Self {
        self.direct_threshold = bytes;
        self
    }

    /// Where a file of `file_size` bytes is sent.
    pub fn upload_url(&self, file_size: u64) -> Result<Url, AdminError> {
        match &self.backend_url {
            Some(backend) if file_size > self.direct_threshold => join(backend, UPLOAD_PATH),
            _ => join(&self.site_url, UPLOAD_PATH),
        }
    }

    /// Stream the release file as a multipart part, touching `activity` for
    /// every chunk read.
    async fn file_part(
        upload: &ReleaseUpload,
        activity: &Activity,
    ) -> Result<(Part, u64), AdminError> {
        let file_error = |source| AdminError::File {
            path: upload.file.clone(),
            source,
        };

        let file = tokio::fs::File::open(&upload.file)
            .await
            .map_err(file_error)?;
        let size = file.metadata().await.map_err(file_error)?.len();

        let file_name = upload
            .file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "release.bin".into());
        let mime = mime_guess::from_path(&upload.file).first_or_octet_stream();

        let activity = activity.clone();
        let chunks = ReaderStream::new(file).inspect(move |_| activity.touch());
        let part = Part::stream_with_length(Body::wrap_stream(chunks), size)
            .file_name(file_name)
            .mime_str(mime.as_ref())?;
        Ok((part, size))
    }
}

#[async_trait]
impl ReleaseTransport for HttpTransport {
    #[instrument(skip_all, fields(file = %upload.file.display()))]
    async fn open_upload(
        &self,
        session: &Session,
        upload: &ReleaseUpload,
        activity: &Activity,
    ) -> Result<UploadResponse, AdminError> {
        let (part, size) = Self::file_part(upload, activity).await?;
        let form = Form::new()
            .part(fields::FILE, part)
            .text(fields::TYPE, upload.kind.backend_literal())
            .text(fields::VERSION, upload.version.clone())
            .text(
                fields::RELEASE_NOTES,
                serde_json::to_string(&upload.release_notes)?,
            );

        let url = self.upload_url(size)?;
        debug!("Uploading {} bytes to {}", size, url);

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, session.bearer())
            .multipart(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(EVENT_STREAM));

        Ok(UploadResponse {
            status,
            is_event_stream,
            body: Box::pin(response.bytes_stream().map_err(AdminError::from)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_files_go_to_backend_when_configured() {
        let transport = HttpTransport::new(
            Url::parse("https://iph.example").unwrap(),
            Some(Url::parse("https://api.iph.example/v1").unwrap()),
        )
        .unwrap();

        assert_eq!(
            transport.upload_url(1024).unwrap().as_str(),
            "https://iph.example/api/releases"
        );
        assert_eq!(
            transport
                .upload_url(DIRECT_UPLOAD_THRESHOLD + 1)
                .unwrap()
                .as_str(),
            "https://api.iph.example/v1/api/releases"
        );

        let relay_only =
            HttpTransport::new(Url::parse("https://iph.example/").unwrap(), None).unwrap();
        assert_eq!(
            relay_only.upload_url(u64::MAX).unwrap().as_str(),
            "https://iph.example/api/releases"
        );
    }
}
