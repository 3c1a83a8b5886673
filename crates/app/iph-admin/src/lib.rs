//! IPH Admin
//!
//! Release upload console for the photobooth site. Signs an administrator in,
//! streams release files to the site relay (or straight to the backend for
//! large files) and follows the progress records until the upload settles.

pub mod client;
pub mod controller;
pub mod error;
pub mod form;
pub mod session;

pub use client::{DIRECT_UPLOAD_THRESHOLD, HttpTransport, SiteClient};
pub use controller::{
    Banner, BannerKind, ByteStream, ReleaseTransport, UploadController, UploadResponse,
    UploadState,
};
pub use error::{AdminError, FormError, SessionError};
pub use form::{
    ACCEPTED_EXTENSIONS, ReleaseUpload, UploadForm, format_file_size, has_accepted_extension,
    parse_release_notes,
};
pub use session::{FileVault, KeyringVault, Session, SessionStore, TokenVault};
