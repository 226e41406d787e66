//! File-backed asset cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::paths::UlaPaths;
use crate::storage::AtomicTomlFile;
use ula_core::asset::{Asset, AssetCache};
use ula_core::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AssetCacheDocument {
    /// Keyed by `type/arch`
    #[serde(default)]
    lists: BTreeMap<String, Vec<Asset>>,
    /// Keyed by the asset's concatenated name
    #[serde(default)]
    timestamps: BTreeMap<String, u64>,
    #[serde(default)]
    latest_versions: BTreeMap<String, u64>,
}

fn list_key(asset_type: &str, architecture: &str) -> String {
    format!("{}/{}", asset_type, architecture)
}

/// Keeps manifests and version markers in `asset_cache.toml`; presence is
/// checked against the files in the support cache.
pub struct TomlAssetCache {
    paths: UlaPaths,
    file: AtomicTomlFile<AssetCacheDocument>,
}

impl TomlAssetCache {
    pub fn new(paths: UlaPaths) -> Self {
        let file = AtomicTomlFile::new(paths.asset_cache_file());
        Self { paths, file }
    }

    fn read(&self) -> Result<AssetCacheDocument> {
        Ok(self.file.load_or_default()?)
    }
}

#[async_trait]
impl AssetCache for TomlAssetCache {
    async fn cached_asset_list(&self, asset_type: &str, architecture: &str) -> Result<Vec<Asset>> {
        Ok(self
            .read()?
            .lists
            .remove(&list_key(asset_type, architecture))
            .unwrap_or_default())
    }

    async fn store_asset_list(
        &self,
        asset_type: &str,
        architecture: &str,
        assets: &[Asset],
    ) -> Result<()> {
        let key = list_key(asset_type, architecture);
        self.file.update(|document| {
            document.lists.insert(key, assets.to_vec());
        })?;
        tracing::debug!(asset_type, architecture, count = assets.len(), "Cached asset list");
        Ok(())
    }

    async fn local_timestamp(&self, asset: &Asset) -> Result<Option<u64>> {
        Ok(self
            .read()?
            .timestamps
            .get(&asset.concatenated_name())
            .copied())
    }

    async fn set_local_timestamp(&self, asset: &Asset, timestamp: u64) -> Result<()> {
        let key = asset.concatenated_name();
        self.file.update(|document| {
            document.timestamps.insert(key, timestamp);
        })?;
        Ok(())
    }

    async fn is_present_locally(&self, asset: &Asset) -> bool {
        tokio::fs::try_exists(self.paths.asset_file(asset))
            .await
            .unwrap_or(false)
    }

    async fn latest_version(&self, asset_type: &str) -> Result<u64> {
        Ok(self
            .read()?
            .latest_versions
            .get(asset_type)
            .copied()
            .unwrap_or(0))
    }

    async fn set_latest_version(&self, asset_type: &str, version: u64) -> Result<()> {
        self.file.update(|document| {
            document.latest_versions.insert(asset_type.to_string(), version);
        })?;
        Ok(())
    }
}
