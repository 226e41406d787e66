//! Download domain models.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::asset::{Asset, ROOTFS_ARCHIVE};

/// Opaque identifier of a download job issued by the download subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DownloadId(pub u64);

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A file that must be downloaded, grouped by the asset type it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequirement {
    pub filename: String,
    pub asset_type: String,
    pub architecture_type: String,
    pub remote_timestamp: u64,
}

impl DownloadRequirement {
    /// Whether this is the root-filesystem archive itself.
    pub fn is_large(&self) -> bool {
        self.filename == ROOTFS_ARCHIVE
    }

    /// File name used while the download sits in the download directory.
    ///
    /// Encodes everything needed to stage the file afterwards.
    pub fn download_title(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.asset_type, self.architecture_type, self.remote_timestamp, self.filename
        )
    }

    /// The asset this requirement downloads.
    pub fn to_asset(&self) -> Asset {
        Asset::new(
            self.filename.clone(),
            self.asset_type.clone(),
            self.architecture_type.clone(),
            self.remote_timestamp,
        )
    }
}

impl From<&Asset> for DownloadRequirement {
    fn from(asset: &Asset) -> Self {
        Self {
            filename: asset.name.clone(),
            asset_type: asset.asset_type.clone(),
            architecture_type: asset.architecture_type.clone(),
            remote_timestamp: asset.remote_timestamp,
        }
    }
}

/// The coordinator's verdict on a completion signal (or on a recovery replay).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadCompletion {
    /// The id does not belong to any download this application issued
    NotOurs,
    /// Recovery was requested but nothing was persisted
    CacheEmpty,
    AllSucceeded,
    Progress { completed: usize, total: usize },
    /// Reason reported by the download subsystem, surfaced verbatim
    Failure(String),
}
