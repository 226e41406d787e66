//! Asset domain models.

use serde::{Deserialize, Serialize};

/// Filename of the compressed root-filesystem archive.
pub const ROOTFS_ARCHIVE: &str = "rootfs.tar.gz";

/// Asset type shared by every distribution.
pub const SUPPORT_ASSET_TYPE: &str = "support";

/// Architecture qualifier for architecture-independent assets.
pub const ALL_ARCHITECTURES: &str = "all";

/// A named remote file with the modification timestamp reported by its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    /// "support" or a distribution name
    pub asset_type: String,
    /// "all" or an architecture name
    pub architecture_type: String,
    /// Remote modification time, seconds since the epoch
    pub remote_timestamp: u64,
}

impl Asset {
    pub fn new(
        name: impl Into<String>,
        asset_type: impl Into<String>,
        architecture_type: impl Into<String>,
        remote_timestamp: u64,
    ) -> Self {
        Self {
            name: name.into(),
            asset_type: asset_type.into(),
            architecture_type: architecture_type.into(),
            remote_timestamp,
        }
    }

    /// Key under which the local timestamp of this asset is cached.
    pub fn concatenated_name(&self) -> String {
        format!("{}:{}", self.asset_type, self.name)
    }

    /// Location relative to the support cache root.
    pub fn path_name(&self) -> String {
        format!("{}/{}", self.asset_type, self.name)
    }

    /// Whether this is (part of) the root-filesystem archive.
    pub fn is_large(&self) -> bool {
        self.name.contains(ROOTFS_ARCHIVE)
    }
}

/// Where an asset list was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetOrigin {
    /// Fetched from the manifest source during this retrieval
    Remote,
    /// Served from the local cache because the remote could not be read
    Cached,
}

/// The assets of one `(asset type, architecture)` manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetList {
    pub asset_type: String,
    pub architecture_type: String,
    pub assets: Vec<Asset>,
    pub origin: AssetOrigin,
}

impl AssetList {
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
