//! Upload state machine driven by the progress records of the relay

use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use release_models::{Activity, DecodedRecord, EventStreamDecoder, ProgressEvent, error_text};
use tracing::{debug, instrument, warn};

use crate::{
    error::AdminError,
    form::{ReleaseUpload, UploadForm},
    session::Session,
};

pub const UPLOAD_SUCCEEDED: &str = "Release uploaded successfully!";
pub const UPLOAD_FAILED: &str = "Upload failed";
pub const ENDED_EARLY: &str = "Upload ended before the server confirmed it";
pub const TIMED_OUT: &str = "Upload timed out waiting for the server";
pub const NOT_SIGNED_IN: &str = "Not signed in. Run `iph-admin login --email <EMAIL>` first";

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, AdminError>> + Send>>;

/// Response to an upload request, before its body is read.
pub struct UploadResponse {
    pub status: u16,
    pub is_event_stream: bool,
    pub body: ByteStream,
}

/// Sends a validated upload somewhere that answers with progress records.
///
/// Implementations `touch` the given [`Activity`] while the request body is
/// being sent; the caller gives up once it stays untouched for its idle
/// timeout before the response arrives.
#[async_trait]
pub trait ReleaseTransport: Send + Sync {
    async fn open_upload(
        &self,
        session: &Session,
        upload: &ReleaseUpload,
        activity: &Activity,
    ) -> Result<UploadResponse, AdminError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Uploading { percent: u8 },
    Succeeded,
    Failed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    Success,
    Error,
}

/// The single inline message shown under the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub kind: BannerKind,
    pub text: String,
}

impl Banner {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: BannerKind::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: BannerKind::Error,
            text: text.into(),
        }
    }
}

pub struct UploadController {
    form: UploadForm,
    state: UploadState,
    banner: Option<Banner>,
    idle_timeout: Duration,
}

impl UploadController {
    pub fn new(form: UploadForm) -> Self {
        Self {
            form,
            state: UploadState::Idle,
            banner: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Longest wait for the next chunk of the response before giving up.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn form(&self) -> &UploadForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut UploadForm {
        &mut self.form
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    pub fn banner(&self) -> Option<&Banner> {
        self.banner.as_ref()
    }

    pub fn is_uploading(&self) -> bool {
        matches!(self.state, UploadState::Uploading { .. })
    }

    pub fn can_submit(&self) -> bool {
        !self.is_uploading() && self.form.can_submit()
    }

    /// Validate and send the form, following the response until a terminal
    /// record, an error or the idle timeout. `observer` sees every state
    /// change in order.
    ///
    /// Without a session nothing is sent and the banner asks for a login.
    #[instrument(skip_all, fields(kind = %self.form.kind, version = %self.form.version))]
    pub async fn submit<T, F>(
        &mut self,
        transport: &T,
        session: Option<&Session>,
        mut observer: F,
    ) -> Result<&UploadState, AdminError>
    where
        T: ReleaseTransport + ?Sized,
        F: FnMut(&UploadState),
    {
        if self.is_uploading() {
            return Err(AdminError::UploadInFlight);
        }

        let Some(session) = session else {
            self.banner = Some(Banner::error(NOT_SIGNED_IN));
            return Err(AdminError::NotAuthenticated);
        };

        let upload = match self.form.validate() {
            Ok(upload) => upload,
            Err(e) => {
                self.banner = Some(Banner::error(e.to_string()));
                return Err(e.into());
            }
        };

        self.banner = None;
        self.transition(UploadState::Uploading { percent: 0 }, &mut observer);

        let activity = Activity::new();
        let opened = activity
            .bound(
                self.idle_timeout,
                transport.open_upload(session, &upload, &activity),
            )
            .await;

        match opened {
            Some(Ok(response)) if response.is_event_stream => {
                self.follow(response.body, &mut observer).await;
            }
            Some(Ok(response)) => {
                let message = self.read_rejection(response).await;
                self.fail(message, &mut observer);
            }
            Some(Err(e)) => {
                warn!("Upload request failed: {}", e);
                self.fail(e.user_message(), &mut observer);
            }
            None => {
                warn!("No response {:?} after the upload body was sent", self.idle_timeout);
                self.fail(TIMED_OUT.into(), &mut observer);
            }
        }

        Ok(&self.state)
    }

    async fn follow<F>(&mut self, mut body: ByteStream, observer: &mut F)
    where
        F: FnMut(&UploadState),
    {
        let mut decoder = EventStreamDecoder::new();

        loop {
            let next = match tokio::time::timeout(self.idle_timeout, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!("No progress for {:?}", self.idle_timeout);
                    self.fail(TIMED_OUT.into(), observer);
                    return;
                }
            };

            match next {
                Some(Ok(chunk)) => {
                    for record in decoder.push(&chunk) {
                        match record {
                            DecodedRecord::Event(event) => {
                                if self.apply(event, observer) {
                                    return;
                                }
                            }
                            DecodedRecord::Ignored(raw) => {
                                debug!("Skipping unreadable progress record: {}", raw);
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("Upload stream failed: {}", e);
                    self.fail(e.user_message(), observer);
                    return;
                }
                None => {
                    if decoder.finish() {
                        debug!("Upload stream ended inside a record");
                    }
                    self.fail(ENDED_EARLY.into(), observer);
                    return;
                }
            }
        }
    }

    /// Returns true once the upload reached a terminal state.
    fn apply<F>(&mut self, event: ProgressEvent, observer: &mut F) -> bool
    where
        F: FnMut(&UploadState),
    {
        match event {
            ProgressEvent::Progress { .. } => {
                let percent = event.percent().unwrap_or(0);
                self.transition(UploadState::Uploading { percent }, observer);
                false
            }
            ProgressEvent::Complete { .. } => {
                self.form.reset();
                self.banner = Some(Banner::success(UPLOAD_SUCCEEDED));
                self.transition(UploadState::Succeeded, observer);
                true
            }
            ProgressEvent::Error { error } => {
                let message = error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| UPLOAD_FAILED.into());
                self.fail(message, observer);
                true
            }
        }
    }

    async fn read_rejection(&self, response: UploadResponse) -> String {
        let status = response.status;
        let mut body = response.body;
        let mut raw = Vec::new();

        loop {
            match tokio::time::timeout(self.idle_timeout, body.next()).await {
                Ok(Some(Ok(chunk))) => raw.extend_from_slice(&chunk),
                Ok(Some(Err(e))) => {
                    warn!(status, "Failed to read upload rejection: {}", e);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(status, "Timed out reading upload rejection");
                    break;
                }
            }
        }

        warn!(status, "Upload answered without a progress stream");
        error_text(&String::from_utf8_lossy(&raw)).unwrap_or_else(|| UPLOAD_FAILED.into())
    }

    fn fail<F>(&mut self, message: String, observer: &mut F)
    where
        F: FnMut(&UploadState),
    {
        self.banner = Some(Banner::error(message.clone()));
        self.transition(UploadState::Failed { message }, observer);
    }

    fn transition<F>(&mut self, state: UploadState, observer: &mut F)
    where
        F: FnMut(&UploadState),
    {
        self.state = state;
        observer(&self.state);
    }
}
