//! Version and changelog payloads for the landing and releases pages

use serde::{Deserialize, Serialize};

use crate::kind::PackageKind;

pub const DISPLAY_NAME: &str = "Photobooth IPH";
pub const SHORT_NAME: &str = "IPH Photobooth";
pub const COMPANY: &str = "Intania Production House";

/// Latest release of one package kind as reported by the backend.
/// Every field is optional on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LatestRelease {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub has_download: bool,
    #[serde(default)]
    pub release_notes: Vec<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// Response of `GET /api/version`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VersionSummary {
    /// Installer version
    pub version: Option<String>,
    pub vm_version: Option<String>,
    pub name: String,
    pub short_name: String,
    pub company: String,
    pub has_download: bool,
    pub release_notes: Vec<String>,
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VersionSummary {
    /// Merge the per-kind lookups. The installer record drives the download
    /// fields, the VM record only contributes its version.
    pub fn from_releases(installer: Option<LatestRelease>, vm: Option<LatestRelease>) -> Self {
        if installer.is_none() && vm.is_none() {
            return Self::unavailable("No releases available");
        }

        let vm_version = vm.and_then(|release| release.version);
        let installer = installer.unwrap_or_default();

        Self {
            version: installer.version,
            vm_version,
            has_download: installer.has_download,
            release_notes: installer.release_notes,
            file_size: installer.file_size,
            ..Self::unavailable_with(None)
        }
    }

    /// Neutral payload: no versions, fixed display metadata.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::unavailable_with(Some(message.into()))
    }

    fn unavailable_with(error: Option<String>) -> Self {
        Self {
            version: None,
            vm_version: None,
            name: DISPLAY_NAME.to_string(),
            short_name: SHORT_NAME.to_string(),
            company: COMPANY.to_string(),
            has_download: false,
            release_notes: Vec::new(),
            file_size: None,
            error,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub version: String,
    #[serde(default)]
    pub release_notes: Vec<String>,
    /// Backend timestamp, passed through as-is
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Response of `GET /api/versions/changelog`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChangelogResponse {
    #[serde(rename = "type")]
    pub kind: PackageKind,
    #[serde(default)]
    pub changelog: Vec<ChangelogEntry>,
}

impl ChangelogResponse {
    pub fn empty(kind: PackageKind) -> Self {
        Self {
            kind,
            changelog: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_takes_download_fields_from_installer() {
        let installer = LatestRelease {
            version: Some("1.4.0".into()),
            has_download: true,
            release_notes: vec!["Faster printing".into()],
            file_size: Some(12_345),
        };
        let vm = LatestRelease {
            version: Some("0.9.1".into()),
            has_download: true,
            release_notes: vec!["ignored".into()],
            file_size: Some(1),
        };

        let summary = VersionSummary::from_releases(Some(installer), Some(vm));
        assert_eq!(summary.version.as_deref(), Some("1.4.0"));
        assert_eq!(summary.vm_version.as_deref(), Some("0.9.1"));
        assert!(summary.has_download);
        assert_eq!(summary.release_notes, vec!["Faster printing".to_string()]);
        assert_eq!(summary.file_size, Some(12_345));
        assert_eq!(summary.name, DISPLAY_NAME);
        assert!(summary.error.is_none());
    }

    #[test]
    fn summary_with_only_vm() {
        let vm = LatestRelease {
            version: Some("2.0.0".into()),
            ..Default::default()
        };
        let summary = VersionSummary::from_releases(None, Some(vm));
        assert_eq!(summary.version, None);
        assert_eq!(summary.vm_version.as_deref(), Some("2.0.0"));
        assert!(!summary.has_download);
    }

    #[test]
    fn summary_without_releases_is_neutral() {
        let summary = VersionSummary::from_releases(None, None);
        assert_eq!(summary.version, None);
        assert_eq!(summary.vm_version, None);
        assert_eq!(summary.company, COMPANY);
        assert_eq!(summary.short_name, SHORT_NAME);
        assert!(summary.error.is_some());

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json["version"].is_null());
        assert!(json["vm_version"].is_null());
        assert!(json["file_size"].is_null());
    }

    #[test]
    fn latest_release_tolerates_missing_fields() {
        let release: LatestRelease = serde_json::from_str(r#"{"version":"1.0.0"}"#).unwrap();
        assert_eq!(release.version.as_deref(), Some("1.0.0"));
        assert!(!release.has_download);
        assert!(release.release_notes.is_empty());
    }

    #[test]
    fn changelog_round_trips_versions_verbatim() {
        let body = r#"{"type":"vm","changelog":[{"version":"v1.0.0-rc.1+build.7 ","release_notes":["a","b"],"created_at":"2025-01-02T03:04:05Z"}]}"#;
        let changelog: ChangelogResponse = serde_json::from_str(body).unwrap();
        assert_eq!(changelog.kind, PackageKind::Vm);
        assert_eq!(changelog.changelog[0].version, "v1.0.0-rc.1+build.7 ");

        let json = serde_json::to_value(&changelog).unwrap();
        assert_eq!(json["type"], "vm");
        assert_eq!(json["changelog"][0]["release_notes"][1], "b");
    }
}
