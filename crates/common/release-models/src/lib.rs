//! Release Models
//!
//! Typed schemas shared by the site relay and the admin uploader: the package
//! kind discriminator, the upload progress records carried over the event
//! stream, and the version/changelog payloads served to the marketing pages.

pub mod activity;
pub mod error;
pub mod error_body;
pub mod event;
pub mod event_stream;
pub mod kind;
pub mod version;

pub use activity::Activity;
pub use error::ModelError;
pub use error_body::error_text;
pub use event::ProgressEvent;
pub use event_stream::{DecodedRecord, EventStreamDecoder, encode_record, error_record};
pub use kind::PackageKind;
pub use version::{
    COMPANY, ChangelogEntry, ChangelogResponse, DISPLAY_NAME, LatestRelease, SHORT_NAME,
    VersionSummary,
};

/// Multipart field names of a release upload.
pub mod fields {
    pub const FILE: &str = "file";
    pub const TYPE: &str = "type";
    pub const VERSION: &str = "version";
    pub const RELEASE_NOTES: &str = "release_notes";
}
