//! Signed-in administrator session and its on-disk store

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SessionError;

const SESSION_DIR: &str = "iph-admin";
const SESSION_FILE: &str = "session.json";
const TOKEN_FILE: &str = "token.json";
const KEYRING_SERVICE: &str = "iph-admin";

/// An authenticated administrator. The token is only revealed when building
/// the `Authorization` header.
#[derive(Debug)]
pub struct Session {
    email: String,
    token: SecretString,
}

impl Session {
    pub fn new(email: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            token: SecretString::from(token.into()),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }
}

/// Where session tokens live. The session file itself only names the account.
pub trait TokenVault: Send + Sync {
    fn store(&self, email: &str, token: &str) -> Result<(), SessionError>;
    fn retrieve(&self, email: &str) -> Result<Option<String>, SessionError>;
    fn delete(&self, email: &str) -> Result<(), SessionError>;
}

/// The platform credential store.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringVault;

impl KeyringVault {
    fn entry(email: &str) -> Result<keyring::Entry, SessionError> {
        Ok(keyring::Entry::new(KEYRING_SERVICE, email)?)
    }
}

impl TokenVault for KeyringVault {
    fn store(&self, email: &str, token: &str) -> Result<(), SessionError> {
        Ok(Self::entry(email)?.set_password(token)?)
    }

    fn retrieve(&self, email: &str) -> Result<Option<String>, SessionError> {
        match Self::entry(email)?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, email: &str) -> Result<(), SessionError> {
        match Self::entry(email)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Owner-only token file, used when no credential store is reachable.
#[derive(Debug, Clone)]
pub struct FileVault {
    path: PathBuf,
}

impl FileVault {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl TokenVault for FileVault {
    fn store(&self, email: &str, token: &str) -> Result<(), SessionError> {
        let stored = StoredToken {
            email: email.to_string(),
            token: token.to_string(),
        };
        let contents =
            serde_json::to_vec(&stored).map_err(|source| SessionError::Corrupted {
                path: self.path.clone(),
                source,
            })?;
        write_atomically(&self.path, &contents).map_err(|e| self.io_error(e))
    }

    fn retrieve(&self, email: &str) -> Result<Option<String>, SessionError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        let stored: StoredToken =
            serde_json::from_slice(&raw).map_err(|source| SessionError::Corrupted {
                path: self.path.clone(),
                source,
            })?;
        Ok((stored.email == email).then_some(stored.token))
    }

    fn delete(&self, _email: &str) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredSession {
    email: String,
}

#[derive(Serialize, Deserialize)]
struct StoredToken {
    email: String,
    token: String,
}

/// The signed-in account between invocations. The session file records the
/// email; the token goes to a [`TokenVault`], falling back to an owner-only
/// `token.json` next to the session file.
#[derive(Clone)]
pub struct SessionStore {
    path: PathBuf,
    vault: Arc<dyn TokenVault>,
    fallback: FileVault,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("path", &self.path)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_vault(path, KeyringVault)
    }

    pub fn with_vault(path: impl Into<PathBuf>, vault: impl TokenVault + 'static) -> Self {
        let path = path.into();
        let fallback = FileVault::new(path.with_file_name(TOKEN_FILE));
        Self {
            path,
            vault: Arc::new(vault),
            fallback,
        }
    }

    /// `<config dir>/iph-admin/session.json`
    pub fn default_path() -> Result<PathBuf, SessionError> {
        let config_dir = dirs::config_dir().ok_or(SessionError::NoConfigDir)?;
        Ok(config_dir.join(SESSION_DIR).join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored session, or `None` when nobody is signed in.
    pub fn load(&self) -> Result<Option<Session>, SessionError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };

        let stored: StoredSession =
            serde_json::from_str(&raw).map_err(|source| SessionError::Corrupted {
                path: self.path.clone(),
                source,
            })?;

        let token = match self.vault.retrieve(&stored.email) {
            Ok(Some(token)) => Some(token),
            Ok(None) => self.fallback.retrieve(&stored.email)?,
            Err(e) => {
                warn!("Credential store unavailable, reading {}: {}", self.fallback.path.display(), e);
                self.fallback.retrieve(&stored.email)?
            }
        };

        match token {
            Some(token) if !token.trim().is_empty() => Ok(Some(Session::new(stored.email, token))),
            _ => {
                debug!("Ignoring session without a token");
                Ok(None)
            }
        }
    }

    /// Replace the stored session. The file is written next to its final
    /// location and renamed into place.
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        let token = session.token.expose_secret();
        match self.vault.store(&session.email, token) {
            Ok(()) => self.fallback.delete(&session.email)?,
            Err(e) => {
                warn!("Credential store unavailable, using {}: {}", self.fallback.path.display(), e);
                self.fallback.store(&session.email, token)?;
            }
        }

        let stored = StoredSession {
            email: session.email.clone(),
        };
        let contents =
            serde_json::to_vec_pretty(&stored).map_err(|source| SessionError::Corrupted {
                path: self.path.clone(),
                source,
            })?;
        write_atomically(&self.path, &contents).map_err(|e| self.io_error(e))?;

        debug!("Saved session for {} to {}", session.email, self.path.display());
        Ok(())
    }

    /// Forget the stored session. Clearing an absent session is not an error.
    pub fn clear(&self) -> Result<(), SessionError> {
        if let Some(email) = self.stored_email()? {
            if let Err(e) = self.vault.delete(&email) {
                warn!("Could not remove token from the credential store: {}", e);
            }
        }
        self.fallback.delete("")?;

        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn stored_email(&self) -> Result<Option<String>, SessionError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        Ok(serde_json::from_str::<StoredSession>(&raw)
            .ok()
            .map(|stored| stored.email))
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Write `contents` to a temporary file beside `path`, restrict it to the
/// owner and rename it into place.
fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
