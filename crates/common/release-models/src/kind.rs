use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Which release artifact a request is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// Desktop installer package
    #[default]
    Installer,
    /// Virtual-machine image
    Vm,
}

impl PackageKind {
    pub const ALL: [PackageKind; 2] = [PackageKind::Installer, PackageKind::Vm];

    /// Literal accepted from site visitors and the admin console.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Installer => "installer",
            PackageKind::Vm => "vm",
        }
    }

    /// Literal the release backend expects in `type` query params and upload
    /// fields. The backend still calls the installer `msi`.
    pub fn backend_literal(&self) -> &'static str {
        match self {
            PackageKind::Installer => "msi",
            PackageKind::Vm => "vm",
        }
    }
}

impl std::str::FromStr for PackageKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installer" => Ok(PackageKind::Installer),
            "vm" => Ok(PackageKind::Vm),
            _ => Err(ModelError::InvalidPackageKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
