//! Upload form fields and their local validation

use std::path::{Path, PathBuf};

use release_models::PackageKind;

use crate::error::FormError;

/// File extensions offered by the file picker.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["msi", "zip", "exe", "iso", "ova", "ovf"];

/// Editable state of the upload form.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub file: Option<PathBuf>,
    pub kind: PackageKind,
    pub version: String,
    /// Free text, one release note per line.
    pub release_notes: String,
}

/// A validated form, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseUpload {
    pub file: PathBuf,
    pub kind: PackageKind,
    pub version: String,
    pub release_notes: Vec<String>,
}

impl UploadForm {
    pub fn can_submit(&self) -> bool {
        self.file.is_some() && !self.version.trim().is_empty()
    }

    /// File and version are required. The version is sent exactly as typed.
    pub fn validate(&self) -> Result<ReleaseUpload, FormError> {
        let file = match &self.file {
            Some(file) if !self.version.trim().is_empty() => file.clone(),
            _ => return Err(FormError::MissingRequiredFields),
        };

        Ok(ReleaseUpload {
            file,
            kind: self.kind,
            version: self.version.clone(),
            release_notes: parse_release_notes(&self.release_notes),
        })
    }

    /// Clear file, version and notes after a successful upload. The selected
    /// kind is kept.
    pub fn reset(&mut self) {
        self.file = None;
        self.version.clear();
        self.release_notes.clear();
    }
}

/// One note per non-blank line, trimmed.
pub fn parse_release_notes(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn has_accepted_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(ext))
        })
}

/// `512.0 KB` below one mebibyte, `12.3 MB` from there on.
pub fn format_file_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;

    let bytes = bytes as f64;
    if bytes < MIB {
        format!("{:.1} KB", bytes / KIB)
    } else {
        format!("{:.1} MB", bytes / MIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> UploadForm {
        UploadForm {
            file: Some(PathBuf::from("/tmp/IPH-Setup-1.2.0.msi")),
            kind: PackageKind::Vm,
            version: "1.2.0".into(),
            release_notes: "Fixed crash\n\n  Faster sync  \n".into(),
        }
    }

    #[test]
    fn notes_are_split_per_line() {
        assert_eq!(
            parse_release_notes("Fixed crash\n\n  Faster sync  \n"),
            vec!["Fixed crash", "Faster sync"]
        );
        assert_eq!(parse_release_notes("Line one\r\nLine two"), vec!["Line one", "Line two"]);
        assert!(parse_release_notes(" \n\t\n").is_empty());
    }

    #[test]
    fn validate_requires_file_and_version() {
        let mut form = filled();
        form.file = None;
        assert_eq!(form.validate(), Err(FormError::MissingRequiredFields));
        assert!(!form.can_submit());

        let mut form = filled();
        form.version = "   ".into();
        assert_eq!(form.validate(), Err(FormError::MissingRequiredFields));

        let upload = filled().validate().unwrap();
        assert_eq!(upload.kind, PackageKind::Vm);
        assert_eq!(upload.version, "1.2.0");
        assert_eq!(upload.release_notes, vec!["Fixed crash", "Faster sync"]);
    }

    #[test]
    fn reset_keeps_kind() {
        let mut form = filled();
        form.reset();
        assert!(form.file.is_none());
        assert!(form.version.is_empty());
        assert!(form.release_notes.is_empty());
        assert_eq!(form.kind, PackageKind::Vm);
    }

    #[test]
    fn accepted_extensions() {
        assert!(has_accepted_extension(Path::new("IPH-Setup.MSI")));
        assert!(has_accepted_extension(Path::new("booth-vm.ova")));
        assert!(!has_accepted_extension(Path::new("notes.txt")));
        assert!(!has_accepted_extension(Path::new("installer")));
    }

    #[test]
    fn file_sizes() {
        assert_eq!(format_file_size(512 * 1024), "512.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_file_size(0), "0.0 KB");
    }
}
