//! Manifest source trait.

use super::model::Asset;
use async_trait::async_trait;
use thiserror::Error;

/// Failure modes of a manifest fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// The host could not be reached
    #[error("manifest host unreachable: {0}")]
    Unreachable(String),

    /// The manifest was fetched but could not be parsed
    #[error("malformed manifest: {0}")]
    Malformed(String),
}

/// Fetches the list of assets published for an asset type and architecture.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch_manifest(
        &self,
        asset_type: &str,
        architecture: &str,
    ) -> Result<Vec<Asset>, ManifestError>;
}
