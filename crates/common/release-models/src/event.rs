use serde::{Deserialize, Deserializer, Serialize};

/// One record of the upload progress stream, discriminated by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress {
        #[serde(deserialize_with = "whole_percent")]
        percent: u32,
    },
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ProgressEvent {
    pub fn progress(percent: u32) -> Self {
        ProgressEvent::Progress { percent }
    }

    pub fn complete() -> Self {
        ProgressEvent::Complete { message: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            error: Some(message.into()),
        }
    }

    /// `complete` and `error` end an upload; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }

    /// Percent clamped to the displayable 0..=100 range.
    pub fn percent(&self) -> Option<u8> {
        match self {
            ProgressEvent::Progress { percent } => Some((*percent).min(100) as u8),
            _ => None,
        }
    }
}

/// Accepts any JSON number; fractions are rounded and negatives become 0.
fn whole_percent<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if !raw.is_finite() || raw <= 0.0 {
        return Ok(0);
    }
    Ok(raw.round().min(f64::from(u32::MAX)) as u32)
}
