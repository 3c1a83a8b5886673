//! Request parameters for the proxy endpoints

use release_models::PackageKind;
use serde::Deserialize;

use crate::error::ProxyError;

/// `?type=installer|vm`
#[derive(Deserialize, Debug, Default)]
pub struct KindQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl KindQuery {
    pub fn package_kind(&self) -> Result<PackageKind, ProxyError> {
        let raw = self.kind.as_deref().ok_or(ProxyError::MissingPackageKind)?;
        Ok(raw.parse()?)
    }
}

/// Changelog body as the backend sends it; its `type` echo is not trusted.
#[derive(Deserialize, Debug, Default)]
pub(crate) struct BackendChangelog {
    #[serde(default)]
    pub changelog: Vec<release_models::ChangelogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_query_validation() {
        let query = KindQuery {
            kind: Some("vm".into()),
        };
        assert_eq!(query.package_kind().unwrap(), PackageKind::Vm);

        assert!(matches!(
            KindQuery::default().package_kind(),
            Err(ProxyError::MissingPackageKind)
        ));
        assert!(matches!(
            KindQuery {
                kind: Some("msi".into())
            }
            .package_kind(),
            Err(ProxyError::InvalidPackageKind(_))
        ));
    }
}
