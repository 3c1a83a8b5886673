#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid package kind '{0}'. Use 'installer' or 'vm'")]
    InvalidPackageKind(String),
}
