//! Asset requirement resolution.
//!
//! Decides, for a filesystem's distribution and architecture, which remote
//! files are missing or stale locally.

use std::sync::Arc;

use thiserror::Error;

use super::cache::AssetCache;
use super::model::{ALL_ARCHITECTURES, Asset, AssetList, AssetOrigin, SUPPORT_ASSET_TYPE};
use super::source::ManifestSource;
use crate::download::DownloadRequirement;
use crate::error::UlaError;
use crate::filesystem::Filesystem;

/// Failures while generating download requirements.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    /// Something must be downloaded but the remote could not be reached when
    /// the asset lists were retrieved.
    #[error("remote host is unreachable")]
    RemoteUnreachable,

    #[error(transparent)]
    Cache(#[from] UlaError),
}

/// Computes asset lists and download requirements.
pub struct AssetResolver {
    source: Arc<dyn ManifestSource>,
    cache: Arc<dyn AssetCache>,
}

impl AssetResolver {
    pub fn new(source: Arc<dyn ManifestSource>, cache: Arc<dyn AssetCache>) -> Self {
        Self { source, cache }
    }

    /// Every `(asset type, architecture)` manifest a filesystem depends on.
    fn list_keys(distribution_type: &str, architecture: &str) -> Vec<(String, String)> {
        let mut keys = Vec::with_capacity(4);
        for asset_type in [SUPPORT_ASSET_TYPE, distribution_type] {
            for arch in [ALL_ARCHITECTURES, architecture] {
                keys.push((asset_type.to_string(), arch.to_string()));
            }
        }
        keys
    }

    /// Returns the cached asset lists without touching the network.
    pub async fn cached_asset_lists(
        &self,
        distribution_type: &str,
        architecture: &str,
    ) -> Result<Vec<AssetList>, UlaError> {
        let mut lists = Vec::new();
        for (asset_type, arch) in Self::list_keys(distribution_type, architecture) {
            let assets = self.cache.cached_asset_list(&asset_type, &arch).await?;
            lists.push(AssetList {
                asset_type,
                architecture_type: arch,
                assets,
                origin: AssetOrigin::Cached,
            });
        }
        Ok(lists)
    }

    /// Distribution assets an already-installed filesystem must carry.
    ///
    /// The root-filesystem archive only matters before extraction, so it is
    /// filtered out.
    pub async fn distribution_assets_for_existing_filesystem(
        &self,
        filesystem: &Filesystem,
    ) -> Result<Vec<Asset>, UlaError> {
        let mut assets = Vec::new();
        for arch in [ALL_ARCHITECTURES, filesystem.arch_type.as_str()] {
            let list = self
                .cache
                .cached_asset_list(&filesystem.distribution_type, arch)
                .await?;
            assets.extend(list.into_iter().filter(|asset| !asset.is_large()));
        }
        Ok(assets)
    }

    /// Fetches every manifest fresh, caching each one as soon as it arrives.
    ///
    /// On the first fetch failure the whole set is served from the cache
    /// instead. Lists fetched before the failure were already cached, so they
    /// survive the fallback.
    pub async fn retrieve_all_asset_lists(
        &self,
        distribution_type: &str,
        architecture: &str,
    ) -> Result<Vec<AssetList>, UlaError> {
        let mut lists = Vec::new();
        for (asset_type, arch) in Self::list_keys(distribution_type, architecture) {
            match self.source.fetch_manifest(&asset_type, &arch).await {
                Ok(assets) => {
                    self.cache.store_asset_list(&asset_type, &arch, &assets).await?;
                    lists.push(AssetList {
                        asset_type,
                        architecture_type: arch,
                        assets,
                        origin: AssetOrigin::Remote,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        asset_type = %asset_type,
                        architecture = %arch,
                        "Manifest fetch failed, falling back to cached asset lists: {}",
                        err
                    );
                    return self.cached_asset_lists(distribution_type, architecture).await;
                }
            }
        }
        Ok(lists)
    }

    /// Whether the local copy of `asset` is missing or older than the remote.
    pub async fn asset_needs_update(&self, asset: &Asset) -> Result<bool, UlaError> {
        if !self.cache.is_present_locally(asset).await {
            return Ok(true);
        }
        let local = self.cache.local_timestamp(asset).await?.unwrap_or(0);
        Ok(local < asset.remote_timestamp)
    }

    /// Diffs the asset lists against local state.
    ///
    /// Archive assets are only considered when the filesystem still needs
    /// extraction.
    pub async fn generate_download_requirements(
        &self,
        filesystem: &Filesystem,
        asset_lists: &[AssetList],
        filesystem_needs_extraction: bool,
    ) -> Result<Vec<DownloadRequirement>, ResolverError> {
        let mut requirements = Vec::new();
        let mut requires_unreachable_remote = false;

        for list in asset_lists {
            for asset in &list.assets {
                if asset.is_large() && !filesystem_needs_extraction {
                    continue;
                }
                if !self.asset_needs_update(asset).await? {
                    continue;
                }
                if list.origin == AssetOrigin::Cached {
                    requires_unreachable_remote = true;
                }
                requirements.push(DownloadRequirement::from(asset));
            }
        }

        if requires_unreachable_remote {
            tracing::warn!(
                distribution = %filesystem.distribution_type,
                missing = requirements.len(),
                "Assets need downloading but the remote was unreachable"
            );
            return Err(ResolverError::RemoteUnreachable);
        }

        tracing::debug!(
            distribution = %filesystem.distribution_type,
            count = requirements.len(),
            "Generated download requirements"
        );
        Ok(requirements)
    }

    /// Latest staged version of a distribution's assets.
    pub async fn latest_distribution_version(
        &self,
        distribution_type: &str,
    ) -> Result<u64, UlaError> {
        self.cache.latest_version(distribution_type).await
    }
}
