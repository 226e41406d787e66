//! Provisioning collaborators: filesystem extraction, app script staging and
//! storage probing.

use async_trait::async_trait;
use std::path::Path;

use crate::asset::Asset;
use crate::error::Result;
use crate::filesystem::Filesystem;

/// Result of running the root-filesystem extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Success,
    Failure(String),
}

/// Installs and inspects filesystem directories.
///
/// `directory_name` is the filesystem's on-disk directory
/// (see [`Filesystem::directory_name`]).
#[async_trait]
pub trait FilesystemExtractor: Send + Sync {
    /// Whether the extraction marker exists for this filesystem directory.
    async fn has_been_extracted(&self, directory_name: &str) -> bool;

    /// Extracts the root-filesystem archive, reporting each output line.
    async fn extract(
        &self,
        filesystem: &Filesystem,
        on_line: &(dyn Fn(String) + Send + Sync),
    ) -> Result<ExtractionOutcome>;

    /// Deletes archive files left in the filesystem directory.
    async fn remove_archive_files(&self, directory_name: &str) -> Result<()>;

    /// Copies the distribution assets from the support cache into the
    /// filesystem's support directory.
    async fn copy_assets_onto_filesystem(&self, filesystem: &Filesystem) -> Result<()>;

    async fn assets_present_in_support_cache(&self, assets: &[Asset]) -> bool;

    async fn assets_present_on_filesystem(&self, directory_name: &str, assets: &[Asset]) -> bool;
}

/// Copies a managed application's launch script into a filesystem.
#[async_trait]
pub trait AppScriptInstaller: Send + Sync {
    async fn copy_app_script(&self, app_name: &str, filesystem: &Filesystem) -> Result<()>;
}

/// Reports free space on the volume holding the filesystems.
#[async_trait]
pub trait StorageProbe: Send + Sync {
    async fn available_storage_mb(&self) -> Result<u64>;
}

/// Returns true when `path` names a root-filesystem archive or one of its parts.
pub fn is_archive_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.contains(crate::asset::ROOTFS_ARCHIVE))
        .unwrap_or(false)
}
