//! Upload relay.
//!
//! The multipart request body is streamed to the backend untouched and the
//! backend's event stream is copied back byte for byte. Whatever goes wrong,
//! the client receives a well-formed terminal record.

use std::{
    convert::Infallible,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use release_models::{Activity, DecodedRecord, EventStreamDecoder, error_record};
use tracing::{debug, error, info, warn};

use crate::{
    config::SilencePolicy,
    service::ProxyState,
    utils::{backend_error_message, format_limit},
};

pub const EVENT_STREAM: &str = "text/event-stream";
pub const UPLOAD_FAILED: &str = "Upload failed";
pub const BACKEND_UNREACHABLE: &str = "Upload failed: release service unreachable";
pub const CONNECTION_LOST: &str = "Upload failed: connection to release service lost";
pub const ENDED_EARLY: &str = "Upload ended before the release service confirmed it";
pub const TIMED_OUT: &str = "Upload timed out waiting for the release service";

pub async fn relay_upload(state: &ProxyState, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let Some(content_type) = multipart_content_type(&parts.headers) else {
        warn!("Rejected upload without a multipart content type");
        return event_stream_response(
            StatusCode::BAD_REQUEST,
            error_record("Upload must be sent as multipart/form-data"),
        );
    };

    let limit = state.config.max_upload_bytes;
    if let Some(declared) = declared_length(&parts.headers)
        && declared > limit
    {
        warn!(declared, limit, "Rejected oversized upload");
        return event_stream_response(StatusCode::PAYLOAD_TOO_LARGE, too_large_record(limit));
    }

    let authorization = parts.headers.get(header::AUTHORIZATION).cloned();
    let exceeded = Arc::new(AtomicBool::new(false));
    let activity = Activity::new();
    let upstream =
        reqwest::Body::wrap_stream(limit_body(body, limit, exceeded.clone(), activity.clone()));

    let idle = state.config.upload_idle_timeout;
    let policy = state.config.silence_policy;
    let send = state.backend.upload(content_type, authorization, upstream);

    let response = match within(policy, &activity, idle, send).await {
        Some(Ok(response)) => response,
        Some(Err(e)) if exceeded.load(Ordering::Relaxed) => {
            warn!(limit, "Upload body crossed the size limit: {}", e);
            return event_stream_response(StatusCode::PAYLOAD_TOO_LARGE, too_large_record(limit));
        }
        Some(Err(e)) => {
            error!("Upload relay could not reach the backend: {}", e);
            return event_stream_response(StatusCode::BAD_GATEWAY, error_record(BACKEND_UNREACHABLE));
        }
        None => {
            warn!(?idle, "Release service sent no response after the upload body");
            return event_stream_response(StatusCode::GATEWAY_TIMEOUT, error_record(TIMED_OUT));
        }
    };

    let status = response.status();
    if !status.is_success() {
        activity.touch();
        let message = within(
            policy,
            &activity,
            idle,
            backend_error_message(response, UPLOAD_FAILED),
        )
        .await
        .unwrap_or_else(|| TIMED_OUT.to_string());
        warn!(%status, "Backend rejected upload: {}", message);
        return event_stream_response(status, error_record(message));
    }

    info!("Backend accepted upload, relaying progress stream");
    let stream = relay_stream(response.bytes_stream(), idle, policy);
    event_stream_response(StatusCode::OK, Body::from_stream(stream))
}

/// Wrap `body` with the headers the browser parser expects.
pub fn event_stream_response(status: StatusCode, body: impl Into<Body>) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        body.into(),
    )
        .into_response()
}

fn multipart_content_type(headers: &HeaderMap) -> Option<HeaderValue> {
    let value = headers.get(header::CONTENT_TYPE)?;
    let is_multipart = value
        .to_str()
        .ok()?
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/form-data");
    is_multipart.then(|| value.clone())
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn too_large_record(limit: u64) -> Bytes {
    error_record(format!("Upload exceeds the {} limit", format_limit(limit)))
}

/// Under [`SilencePolicy::Fail`], await `future` unless `idle` passes
/// without activity. Under [`SilencePolicy::Wait`], await it unbounded.
async fn within<F: Future>(
    policy: SilencePolicy,
    activity: &Activity,
    idle: Duration,
    future: F,
) -> Option<F::Output> {
    match policy {
        SilencePolicy::Fail => activity.bound(idle, future).await,
        SilencePolicy::Wait => Some(future.await),
    }
}

/// Pass request chunks through, failing the body once more than `limit`
/// bytes have gone by. Every chunk, and the end of the body, touches
/// `activity`.
fn limit_body(
    body: Body,
    limit: u64,
    exceeded: Arc<AtomicBool>,
    activity: Activity,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let mut data = body.into_data_stream();

    async_stream::stream! {
        let mut seen: u64 = 0;
        while let Some(chunk) = data.next().await {
            activity.touch();
            match chunk {
                Ok(bytes) => {
                    seen += bytes.len() as u64;
                    if seen > limit {
                        exceeded.store(true, Ordering::Relaxed);
                        yield Err(std::io::Error::other("upload exceeds size limit"));
                        break;
                    }
                    yield Ok(bytes);
                }
                Err(e) => {
                    debug!("Client upload body failed: {}", e);
                    yield Err(std::io::Error::other(e));
                    break;
                }
            }
        }
        activity.touch();
    }
}

/// Copy the backend event stream verbatim, watching it for a terminal record.
/// If the stream breaks, ends or stays silent too long before one was seen,
/// a closing error record is appended.
pub fn relay_stream<S, E>(
    upstream: S,
    idle_timeout: Duration,
    policy: SilencePolicy,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let mut observer = EventStreamDecoder::new();
        let mut terminal = false;

        loop {
            let next = match policy {
                SilencePolicy::Fail => {
                    match tokio::time::timeout(idle_timeout, upstream.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!(?idle_timeout, "Release service went silent during upload");
                            if !terminal {
                                yield Ok(closing_record(&observer, TIMED_OUT));
                            }
                            break;
                        }
                    }
                }
                SilencePolicy::Wait => upstream.next().await,
            };

            match next {
                Some(Ok(chunk)) => {
                    if !terminal {
                        terminal = observer
                            .push(&chunk)
                            .into_iter()
                            .filter_map(DecodedRecord::into_event)
                            .any(|event| event.is_terminal());
                    }
                    yield Ok(chunk);
                }
                Some(Err(e)) => {
                    error!("Release service stream failed: {}", e);
                    if !terminal {
                        yield Ok(closing_record(&observer, CONNECTION_LOST));
                    }
                    break;
                }
                None => {
                    if !terminal {
                        warn!("Release service closed the stream without a terminal record");
                        yield Ok(closing_record(&observer, ENDED_EARLY));
                    }
                    break;
                }
            }
        }
    }
}

/// Error record, preceded by a separator when an unterminated record is
/// pending so the client decodes it on its own.
fn closing_record(observer: &EventStreamDecoder, message: &str) -> Bytes {
    let record = error_record(message);
    if !observer.has_partial() {
        return record;
    }

    let mut framed = BytesMut::with_capacity(record.len() + 2);
    framed.extend_from_slice(b"\n\n");
    framed.extend_from_slice(&record);
    framed.freeze()
}
