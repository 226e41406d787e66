//! Asset cache trait.

use super::model::Asset;
use crate::error::Result;
use async_trait::async_trait;

/// Local book-keeping for assets: cached manifests, the remote timestamp each
/// local file was downloaded at, and the latest staged version per asset type.
#[async_trait]
pub trait AssetCache: Send + Sync {
    /// Returns the cached manifest, or an empty list when none was cached.
    async fn cached_asset_list(&self, asset_type: &str, architecture: &str) -> Result<Vec<Asset>>;

    async fn store_asset_list(
        &self,
        asset_type: &str,
        architecture: &str,
        assets: &[Asset],
    ) -> Result<()>;

    /// Remote timestamp recorded when the local copy of `asset` was staged.
    async fn local_timestamp(&self, asset: &Asset) -> Result<Option<u64>>;

    async fn set_local_timestamp(&self, asset: &Asset, timestamp: u64) -> Result<()>;

    /// Whether the asset's file exists in the local support cache.
    async fn is_present_locally(&self, asset: &Asset) -> bool;

    /// Latest version marker staged for an asset type (0 when nothing was).
    async fn latest_version(&self, asset_type: &str) -> Result<u64>;

    async fn set_latest_version(&self, asset_type: &str, version: u64) -> Result<()>;
}
