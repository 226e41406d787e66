//! Filesystem repository trait.

use super::model::Filesystem;
use crate::error::Result;
use crate::session::ServiceLocation;
use async_trait::async_trait;
use tokio::sync::watch;

/// An abstract repository for managing filesystem persistence.
#[async_trait]
pub trait FilesystemRepository: Send + Sync {
    /// Subscribes to snapshots of every stored filesystem.
    fn watch_all(&self) -> watch::Receiver<Vec<Filesystem>>;

    async fn list_all(&self) -> Result<Vec<Filesystem>>;

    /// Finds the managed-app filesystem for a distribution and location.
    async fn find_apps_filesystem(
        &self,
        distribution_type: &str,
        location: ServiceLocation,
    ) -> Result<Option<Filesystem>>;

    /// Inserts a new filesystem. The `id` field of the argument is ignored.
    ///
    /// Fails with `UlaError::Conflict` when a filesystem with the same name
    /// exists.
    async fn insert(&self, filesystem: &Filesystem) -> Result<()>;

    /// Replaces the stored filesystem with the same id.
    async fn update(&self, filesystem: &Filesystem) -> Result<()>;
}
