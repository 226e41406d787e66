//! Download book-keeping for asset requirements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config::render_asset_url;
use crate::http_downloader::{DownloadBackend, DownloadStatus};
use crate::paths::UlaPaths;
use crate::storage::AtomicTomlFile;
use ula_core::asset::AssetCache;
use ula_core::download::{DownloadCompletion, DownloadCoordinator, DownloadId, DownloadRequirement};
use ula_core::error::{Result, UlaError};
use ula_core::provision::is_archive_file;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EnqueuedDownload {
    id: DownloadId,
    requirement: DownloadRequirement,
}

/// Contents of `downloads.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DownloadBookkeeping {
    #[serde(default)]
    in_progress: bool,
    #[serde(default)]
    downloads: Vec<EnqueuedDownload>,
}

#[derive(Debug, Default)]
struct Tracking {
    enqueued: BTreeSet<DownloadId>,
    completed: BTreeSet<DownloadId>,
}

/// [`DownloadCoordinator`] over a [`DownloadBackend`].
///
/// The enqueued batch is written to `downloads.toml` while it is in flight,
/// so a restarted process can pick up where the previous one stopped.
/// Finished files wait in the downloads directory, named by
/// [`DownloadRequirement::download_title`], until they are staged.
pub struct AssetDownloader {
    backend: Arc<dyn DownloadBackend>,
    cache: Arc<dyn AssetCache>,
    paths: UlaPaths,
    download_base_url: String,
    bookkeeping: AtomicTomlFile<DownloadBookkeeping>,
    tracking: Mutex<Tracking>,
}

impl AssetDownloader {
    pub fn new(
        backend: Arc<dyn DownloadBackend>,
        cache: Arc<dyn AssetCache>,
        paths: UlaPaths,
        download_base_url: impl Into<String>,
    ) -> Self {
        let bookkeeping = AtomicTomlFile::new(paths.downloads_file());
        Self {
            backend,
            cache,
            paths,
            download_base_url: download_base_url.into(),
            bookkeeping,
            tracking: Mutex::new(Tracking::default()),
        }
    }

    fn tracking(&self) -> Result<std::sync::MutexGuard<'_, Tracking>> {
        self.tracking
            .lock()
            .map_err(|_| UlaError::internal("download tracking lock poisoned"))
    }

    fn download_url(&self, requirement: &DownloadRequirement) -> String {
        format!(
            "{}/{}",
            render_asset_url(
                &self.download_base_url,
                &requirement.asset_type,
                &requirement.architecture_type
            ),
            requirement.filename
        )
    }

    /// Forgets the current batch, in memory, on disk and in the backend.
    async fn finish_batch(&self) -> Result<()> {
        *self.tracking()? = Tracking::default();
        self.bookkeeping.remove()?;
        self.backend.forget_finished(&[]).await;
        Ok(())
    }

    /// Drops backend job records the persisted batch does not refer to.
    pub async fn prune_download_jobs(&self) -> Result<()> {
        let keep: Vec<DownloadId> = self
            .bookkeeping
            .load()?
            .filter(|bookkeeping| bookkeeping.in_progress)
            .map(|bookkeeping| bookkeeping.downloads.iter().map(|d| d.id).collect())
            .unwrap_or_default();
        self.backend.forget_finished(&keep).await;
        Ok(())
    }

    async fn clear_downloads_dir(&self) -> Result<()> {
        let dir = self.paths.downloads_dir();
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn record_completion(&self, id: DownloadId) -> Result<DownloadCompletion> {
        if !self.is_owned_download(id) {
            return Ok(DownloadCompletion::NotOurs);
        }

        let failure = match self.backend.status(id).await {
            DownloadStatus::Failed(reason) => Some(reason),
            DownloadStatus::Unknown => Some(format!("Download {} is unknown to the downloader", id)),
            DownloadStatus::Pending | DownloadStatus::Succeeded => None,
        };
        if let Some(reason) = failure {
            let batch: Vec<DownloadId> = self.tracking()?.enqueued.iter().copied().collect();
            self.backend.cancel(&batch).await;
            self.finish_batch().await?;
            return Ok(DownloadCompletion::Failure(reason));
        }

        let (completed, total) = {
            let mut tracking = self.tracking()?;
            tracking.completed.insert(id);
            (tracking.completed.len(), tracking.enqueued.len())
        };
        if completed < total {
            tracing::debug!(%id, completed, total, "Download completed");
            return Ok(DownloadCompletion::Progress { completed, total });
        }

        tracing::info!(total, "All downloads completed");
        self.finish_batch().await?;
        Ok(DownloadCompletion::AllSucceeded)
    }

    async fn stage_file(
        &self,
        path: &Path,
        requirement: &DownloadRequirement,
        versions: &mut HashMap<String, u64>,
    ) -> Result<()> {
        let asset = requirement.to_asset();
        tokio::fs::create_dir_all(self.paths.asset_type_dir(&asset.asset_type)).await?;

        let target = self.paths.asset_file(&asset);
        move_file(path, &target).await?;
        if !asset.is_large() {
            make_executable(&target).await?;
        }

        self.cache
            .set_local_timestamp(&asset, asset.remote_timestamp)
            .await?;
        let version = versions.entry(asset.asset_type.clone()).or_insert(0);
        *version = (*version).max(asset.remote_timestamp);

        tracing::debug!(asset = %asset.concatenated_name(), "Staged download");
        Ok(())
    }
}

#[async_trait]
impl DownloadCoordinator for AssetDownloader {
    async fn enqueue(&self, requirements: Vec<DownloadRequirement>) -> Result<Vec<DownloadId>> {
        self.clear_downloads_dir().await?;
        self.finish_batch().await?;

        let mut downloads = Vec::with_capacity(requirements.len());
        for requirement in requirements {
            let url = self.download_url(&requirement);
            let destination = self.paths.downloads_dir().join(requirement.download_title());
            match self.backend.enqueue(url, destination).await {
                Ok(id) => downloads.push(EnqueuedDownload { id, requirement }),
                Err(err) => {
                    let issued: Vec<DownloadId> = downloads.iter().map(|d| d.id).collect();
                    self.backend.cancel(&issued).await;
                    return Err(err);
                }
            }
        }

        let ids: Vec<DownloadId> = downloads.iter().map(|d| d.id).collect();
        self.tracking()?.enqueued = ids.iter().copied().collect();
        self.bookkeeping.save(&DownloadBookkeeping {
            in_progress: true,
            downloads,
        })?;

        tracing::info!(count = ids.len(), "Asset downloads issued");
        Ok(ids)
    }

    fn is_owned_download(&self, id: DownloadId) -> bool {
        self.tracking
            .lock()
            .map(|tracking| tracking.enqueued.contains(&id))
            .unwrap_or(false)
    }

    async fn handle_completion(&self, id: DownloadId) -> DownloadCompletion {
        self.record_completion(id)
            .await
            .unwrap_or_else(|err| DownloadCompletion::Failure(err.to_string()))
    }

    async fn has_persisted_state(&self) -> bool {
        match self.bookkeeping.load() {
            Ok(bookkeeping) => bookkeeping.is_some_and(|b| b.in_progress),
            Err(err) => {
                tracing::warn!("Unreadable download book-keeping: {}", err);
                false
            }
        }
    }

    async fn recover_persisted_state(&self) -> DownloadCompletion {
        let bookkeeping = match self.bookkeeping.load() {
            Ok(Some(bookkeeping)) if bookkeeping.in_progress && !bookkeeping.downloads.is_empty() => {
                bookkeeping
            }
            Ok(_) => return DownloadCompletion::CacheEmpty,
            Err(err) => {
                tracing::warn!("Unreadable download book-keeping: {}", err);
                return DownloadCompletion::CacheEmpty;
            }
        };

        let total = bookkeeping.downloads.len();
        match self.tracking() {
            Ok(mut tracking) => {
                *tracking = Tracking {
                    enqueued: bookkeeping.downloads.iter().map(|d| d.id).collect(),
                    completed: BTreeSet::new(),
                };
            }
            Err(err) => return DownloadCompletion::Failure(err.to_string()),
        }
        tracing::info!(total, "Recovered persisted downloads");

        let mut completed = 0;
        for download in bookkeeping.downloads {
            if self.backend.status(download.id).await == DownloadStatus::Pending {
                continue;
            }
            match self.handle_completion(download.id).await {
                DownloadCompletion::Progress {
                    completed: so_far, ..
                } => completed = so_far,
                other => return other,
            }
        }
        DownloadCompletion::Progress { completed, total }
    }

    async fn stage_completed_downloads(&self) -> Result<()> {
        let dir = self.paths.downloads_dir();
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(());
        }

        let mut staged = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(parse_download_title)
            {
                Some(requirement) => staged.push((path, requirement)),
                None => {
                    tracing::warn!(path = %path.display(), "Skipping unrecognised file in downloads");
                }
            }
        }

        // Old archive parts go once, before any new part lands.
        let archive_types: BTreeSet<String> = staged
            .iter()
            .map(|(_, requirement)| requirement.to_asset())
            .filter(|asset| asset.is_large())
            .map(|asset| asset.asset_type)
            .collect();
        for asset_type in &archive_types {
            let type_dir = self.paths.asset_type_dir(asset_type);
            if tokio::fs::try_exists(&type_dir).await? {
                remove_archive_parts(&type_dir).await?;
            }
        }

        let mut versions = HashMap::new();
        for (path, requirement) in &staged {
            self.stage_file(path, requirement, &mut versions).await?;
        }

        for (asset_type, version) in versions {
            if version > self.cache.latest_version(&asset_type).await? {
                self.cache.set_latest_version(&asset_type, version).await?;
            }
        }
        Ok(())
    }
}

/// Inverse of [`DownloadRequirement::download_title`].
fn parse_download_title(title: &str) -> Option<DownloadRequirement> {
    let mut parts = title.splitn(4, '-');
    let asset_type = parts.next()?;
    let architecture_type = parts.next()?;
    let remote_timestamp = parts.next()?.parse().ok()?;
    let filename = parts.next()?;
    if asset_type.is_empty() || architecture_type.is_empty() || filename.is_empty() {
        return None;
    }
    Some(DownloadRequirement {
        filename: filename.to_string(),
        asset_type: asset_type.to_string(),
        architecture_type: architecture_type.to_string(),
        remote_timestamp,
    })
}

async fn remove_archive_parts(dir: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if is_archive_file(&entry.path()) {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // Crossing filesystems
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "asset_downloader_test.rs"]
mod tests;
