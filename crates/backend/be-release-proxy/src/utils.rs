//! Helpers for reading backend error bodies

use release_models::error_text;
use tracing::{debug, warn};

/// Read a failed backend response into a user-facing message, falling back to
/// `fallback` when the body is unreadable or carries nothing useful.
pub async fn backend_error_message(response: reqwest::Response, fallback: &str) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => error_text(&body).unwrap_or_else(|| {
            debug!(%status, "Backend error body had no message");
            fallback.to_string()
        }),
        Err(e) => {
            warn!(%status, "Failed to read backend error body: {}", e);
            fallback.to_string()
        }
    }
}

/// Human-readable byte limit, e.g. `500 MB`.
pub fn format_limit(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{} MB", bytes / MIB)
    } else {
        format!("{} bytes", bytes)
    }
}
