use std::path::PathBuf;

/// Local validation failures of the upload form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("Please fill in all required fields")]
    MissingRequiredFields,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Could not determine the configuration directory")]
    NoConfigDir,
    #[error("Failed to access session file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Session file {path} is corrupted")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error(transparent)]
    Form(#[from] FormError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("An upload is already in progress")]
    UploadInFlight,

    #[error("Not signed in")]
    NotAuthenticated,

    /// Message reported by the site or the backend.
    #[error("{0}")]
    Rejected(String),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Failed to encode request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not read {}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AdminError {
    /// Text suitable for the status banner. Transport details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            AdminError::Rejected(message) => message.clone(),
            AdminError::Http(e) if e.is_timeout() => "The server did not respond in time".into(),
            AdminError::Http(_) | AdminError::Url(_) | AdminError::Json(_) => {
                "Upload failed".into()
            }
            other => other.to_string(),
        }
    }
}
