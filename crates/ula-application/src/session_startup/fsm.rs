//! Session provisioning state machine.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use super::event::SessionStartupEvent;
use super::state::SessionStartupState;
use crate::machine::StateMachine;
use ula_core::asset::{AssetList, AssetResolver, ResolverError};
use ula_core::download::{DownloadCompletion, DownloadCoordinator, DownloadId, DownloadRequirement};
use ula_core::error::Result;
use ula_core::filesystem::{Filesystem, FilesystemRepository};
use ula_core::provision::{ExtractionOutcome, FilesystemExtractor, StorageProbe};
use ula_core::session::{Session, SessionRepository};

/// At or below this many free megabytes provisioning cannot continue.
pub const INSUFFICIENT_STORAGE_MB: u64 = 250;

/// At or below this many free megabytes the caller must confirm continuing.
pub const LOW_STORAGE_MB: u64 = 1000;

const UNKNOWN_EXTRACTION_FAILURE: &str = "Unknown reason";

/// Drives a selected session from selection to an extracted filesystem.
pub struct SessionStartupFsm {
    state: Arc<watch::Sender<SessionStartupState>>,
    active_sessions: watch::Receiver<Vec<Session>>,
    filesystems: watch::Receiver<Vec<Filesystem>>,
    filesystem_repository: Arc<dyn FilesystemRepository>,
    resolver: Arc<AssetResolver>,
    coordinator: Arc<dyn DownloadCoordinator>,
    extractor: Arc<dyn FilesystemExtractor>,
    storage_probe: Arc<dyn StorageProbe>,
}

impl SessionStartupFsm {
    pub fn new(
        session_repository: &dyn SessionRepository,
        filesystem_repository: Arc<dyn FilesystemRepository>,
        resolver: Arc<AssetResolver>,
        coordinator: Arc<dyn DownloadCoordinator>,
        extractor: Arc<dyn FilesystemExtractor>,
        storage_probe: Arc<dyn StorageProbe>,
    ) -> Self {
        let (state, _) = watch::channel(SessionStartupState::WaitingForSelection);
        Self {
            state: Arc::new(state),
            active_sessions: session_repository.watch_active(),
            filesystems: filesystem_repository.watch_all(),
            filesystem_repository,
            resolver,
            coordinator,
            extractor,
            storage_probe,
        }
    }

    /// The most recently posted state.
    pub fn state(&self) -> SessionStartupState {
        self.state.borrow().clone()
    }

    #[cfg(test)]
    pub(crate) fn set_state(&self, state: SessionStartupState) {
        self.state.send_replace(state);
    }

    fn post(&self, state: SessionStartupState) {
        tracing::debug!(state = ?state, "Session startup state changed");
        self.state.send_replace(state);
    }

    /// Whether `event` may be handled from the current protocol position.
    pub fn transition_is_acceptable(&self, event: &SessionStartupEvent) -> bool {
        use SessionStartupEvent as E;
        use SessionStartupState as S;

        let current = self.state.borrow();
        let current = current.underlying();
        match event {
            E::SessionSelected { .. } => matches!(current, S::WaitingForSelection),
            E::RetrieveAssetLists { .. } => matches!(
                current,
                S::ReadyForPreparation { .. } | S::AssetsMissingFromSupport
            ),
            E::GenerateDownloads { .. } => matches!(current, S::AssetListsSucceeded { .. }),
            E::DownloadAssets { .. } => matches!(current, S::DownloadsRequired { .. }),
            E::AssetDownloadComplete { download_id } => {
                matches!(current, S::Downloading { .. })
                    || !self.coordinator.is_owned_download(*download_id)
            }
            E::SyncDownloadState => true,
            E::CopyDownloadsToLocalStorage => matches!(current, S::DownloadsSucceeded),
            E::VerifyFilesystemAssets { .. } => {
                matches!(current, S::NoDownloadsRequired | S::LocalCopySucceeded)
            }
            E::VerifyAvailableStorage => matches!(current, S::FilesystemAssetsVerified),
            E::VerifyAvailableStorageComplete => {
                matches!(current, S::VerifyingStorage | S::StorageLow { .. })
            }
            E::ExtractFilesystem { .. } => matches!(current, S::StorageSufficient),
            E::ResetState => true,
        }
    }

    async fn select_session(&self, session: Session) {
        let active = self.active_sessions.borrow().clone();
        if !active.is_empty() {
            if active.iter().any(|running| running.id == session.id) {
                tracing::info!(session = %session.name, "Selected session is already running");
                self.post(SessionStartupState::SessionRestartable { session });
            } else {
                tracing::info!(
                    session = %session.name,
                    active = active.len(),
                    "Another session is running, refusing to start a second one"
                );
                self.post(SessionStartupState::SingleSessionNotAllowed);
            }
            return;
        }

        let filesystem = self
            .filesystems
            .borrow()
            .iter()
            .find(|filesystem| filesystem.id == session.filesystem_id)
            .cloned();
        match filesystem {
            Some(filesystem) => {
                tracing::info!(
                    session = %session.name,
                    filesystem = %filesystem.name,
                    "Session ready for preparation"
                );
                self.post(SessionStartupState::ReadyForPreparation {
                    session,
                    filesystem,
                });
            }
            None => {
                tracing::error!(
                    session = %session.name,
                    filesystem_id = session.filesystem_id,
                    "Selected session has no filesystem"
                );
                self.post(SessionStartupState::SessionFilesystemMissing { session });
            }
        }
    }

    async fn retrieve_asset_lists(&self, filesystem: Filesystem) {
        self.post(SessionStartupState::RetrievingAssetLists);

        let result = self
            .resolver
            .retrieve_all_asset_lists(&filesystem.distribution_type, &filesystem.arch_type)
            .await;
        match result {
            Ok(asset_lists)
                if !asset_lists.is_empty() && asset_lists.iter().all(|list| !list.is_empty()) =>
            {
                tracing::info!(count = asset_lists.len(), "Asset lists retrieved");
                self.post(SessionStartupState::AssetListsSucceeded { asset_lists });
            }
            Ok(asset_lists) => {
                let empty: Vec<String> = asset_lists
                    .iter()
                    .filter(|list| list.is_empty())
                    .map(|list| format!("{}/{}", list.asset_type, list.architecture_type))
                    .collect();
                tracing::error!(?empty, "Asset lists are incomplete");
                self.post(SessionStartupState::AssetListsFailed);
            }
            Err(err) => {
                tracing::error!("Failed to retrieve asset lists: {}", err);
                self.post(SessionStartupState::AssetListsFailed);
            }
        }
    }

    async fn generate_downloads(&self, filesystem: Filesystem, asset_lists: Vec<AssetList>) {
        self.post(SessionStartupState::GeneratingDownloadRequirements);

        let extracted = self
            .extractor
            .has_been_extracted(&filesystem.directory_name())
            .await;
        let needs_extraction = !extracted && !filesystem.is_created_from_backup;

        let result = self
            .resolver
            .generate_download_requirements(&filesystem, &asset_lists, needs_extraction)
            .await;
        let next = match result {
            Ok(requirements) if requirements.is_empty() => SessionStartupState::NoDownloadsRequired,
            Ok(requirements) => {
                let large_download_required = requirements.iter().any(DownloadRequirement::is_large);
                tracing::info!(
                    count = requirements.len(),
                    large_download_required,
                    "Downloads required"
                );
                SessionStartupState::DownloadsRequired {
                    requirements,
                    large_download_required,
                }
            }
            Err(ResolverError::RemoteUnreachable) => SessionStartupState::RemoteUnreachable,
            Err(ResolverError::Cache(err)) => {
                tracing::error!("Asset cache unreadable while diffing: {}", err);
                SessionStartupState::AssetListsFailed
            }
        };
        self.post(next);
    }

    async fn download_assets(&self, requirements: Vec<DownloadRequirement>) {
        // Progress is posted before enqueueing so an immediate completion
        // signal finds the machine already downloading.
        self.post(SessionStartupState::Downloading {
            completed: 0,
            total: requirements.len(),
        });

        match self.coordinator.enqueue(requirements).await {
            Ok(ids) => tracing::info!(count = ids.len(), "Downloads enqueued"),
            Err(err) => {
                tracing::error!("Failed to enqueue downloads: {}", err);
                self.post(SessionStartupState::DownloadsFailed {
                    reason: err.to_string(),
                });
            }
        }
    }

    fn apply_completion(&self, completion: DownloadCompletion) {
        let next = match completion {
            DownloadCompletion::NotOurs => {
                tracing::debug!("Ignoring completion of a foreign download");
                return;
            }
            DownloadCompletion::CacheEmpty => SessionStartupState::CacheAccessedWhileEmpty,
            DownloadCompletion::AllSucceeded => SessionStartupState::DownloadsSucceeded,
            DownloadCompletion::Progress { completed, total } => {
                SessionStartupState::Downloading { completed, total }
            }
            DownloadCompletion::Failure(reason) => {
                tracing::error!(reason = %reason, "Download failed");
                SessionStartupState::DownloadsFailed { reason }
            }
        };
        self.post(next);
    }

    async fn asset_download_complete(&self, download_id: DownloadId) {
        let completion = self.coordinator.handle_completion(download_id).await;
        self.apply_completion(completion);
    }

    async fn sync_download_state(&self) {
        let in_sync_position = matches!(
            self.state.borrow().underlying(),
            SessionStartupState::WaitingForSelection | SessionStartupState::Downloading { .. }
        );
        if !in_sync_position {
            tracing::warn!("Download state sync requested outside of a download phase");
            self.post(SessionStartupState::CacheAccessedInWrongState);
            return;
        }

        if !self.coordinator.has_persisted_state().await {
            tracing::debug!("No persisted downloads to recover");
            return;
        }

        tracing::info!("Recovering downloads issued before restart");
        self.post(SessionStartupState::Downloading {
            completed: 0,
            total: 0,
        });
        let completion = self.coordinator.recover_persisted_state().await;
        self.apply_completion(completion);
    }

    async fn copy_downloads_to_local_storage(&self) {
        self.post(SessionStartupState::CopyingLocally);

        match self.coordinator.stage_completed_downloads().await {
            Ok(()) => self.post(SessionStartupState::LocalCopySucceeded),
            Err(err) => {
                tracing::error!("Failed to stage downloads: {}", err);
                self.post(SessionStartupState::LocalCopyFailed {
                    reason: err.to_string(),
                });
            }
        }
    }

    async fn verify_filesystem_assets(&self, filesystem: Filesystem) {
        self.post(SessionStartupState::VerifyingFilesystemAssets);

        let next = match self.update_filesystem_assets(filesystem).await {
            Ok(state) => state,
            Err(err) => {
                tracing::error!("Failed to copy assets onto filesystem: {}", err);
                SessionStartupState::FilesystemCopyFailed {
                    reason: err.to_string(),
                }
            }
        };
        self.post(next);
    }

    async fn update_filesystem_assets(&self, filesystem: Filesystem) -> Result<SessionStartupState> {
        let directory = filesystem.directory_name();
        let required = self
            .resolver
            .distribution_assets_for_existing_filesystem(&filesystem)
            .await?;
        let latest = self
            .resolver
            .latest_distribution_version(&filesystem.distribution_type)
            .await?;

        let present = self
            .extractor
            .assets_present_on_filesystem(&directory, &required)
            .await;
        if present && filesystem.version_code_used >= latest {
            return Ok(SessionStartupState::FilesystemAssetsVerified);
        }

        if !self.extractor.assets_present_in_support_cache(&required).await {
            tracing::warn!(
                distribution = %filesystem.distribution_type,
                "Distribution assets missing from support cache"
            );
            return Ok(SessionStartupState::AssetsMissingFromSupport);
        }

        self.extractor.copy_assets_onto_filesystem(&filesystem).await?;

        let mut updated = filesystem;
        updated.version_code_used = latest;
        self.filesystem_repository.update(&updated).await?;

        if self.extractor.has_been_extracted(&directory).await {
            self.extractor.remove_archive_files(&directory).await?;
        }

        tracing::info!(
            filesystem = %updated.name,
            version = latest,
            "Filesystem assets updated"
        );
        Ok(SessionStartupState::FilesystemAssetsVerified)
    }

    async fn verify_available_storage(&self) {
        self.post(SessionStartupState::VerifyingStorage);

        let next = match self.storage_probe.available_storage_mb().await {
            Ok(available_mb) if available_mb <= INSUFFICIENT_STORAGE_MB => {
                SessionStartupState::StorageInsufficient { available_mb }
            }
            Ok(available_mb) if available_mb <= LOW_STORAGE_MB => {
                SessionStartupState::StorageLow { available_mb }
            }
            Ok(_) => SessionStartupState::StorageSufficient,
            Err(err) => {
                tracing::error!("Failed to probe available storage: {}", err);
                SessionStartupState::StorageInsufficient { available_mb: 0 }
            }
        };
        self.post(next);
    }

    async fn remove_archives(&self, directory: &str) {
        if let Err(err) = self.extractor.remove_archive_files(directory).await {
            tracing::warn!(directory, "Failed to remove archive files: {}", err);
        }
    }

    async fn extract_filesystem(&self, filesystem: Filesystem) {
        let directory = filesystem.directory_name();

        if self.extractor.has_been_extracted(&directory).await {
            tracing::info!(filesystem = %filesystem.name, "Filesystem already extracted");
            self.remove_archives(&directory).await;
            self.post(SessionStartupState::ExtractionSucceeded);
            return;
        }

        self.post(SessionStartupState::Extracting {
            line: String::new(),
        });
        let state = Arc::clone(&self.state);
        let on_line = move |line: String| {
            state.send_replace(SessionStartupState::Extracting { line });
        };

        let next = match self.extractor.extract(&filesystem, &on_line).await {
            Ok(ExtractionOutcome::Success) => {
                if self.extractor.has_been_extracted(&directory).await {
                    self.remove_archives(&directory).await;
                    tracing::info!(filesystem = %filesystem.name, "Filesystem extracted");
                    SessionStartupState::ExtractionSucceeded
                } else {
                    SessionStartupState::ExtractionFailed {
                        reason: UNKNOWN_EXTRACTION_FAILURE.to_string(),
                    }
                }
            }
            Ok(ExtractionOutcome::Failure(reason)) => SessionStartupState::ExtractionFailed { reason },
            Err(err) => SessionStartupState::ExtractionFailed {
                reason: err.to_string(),
            },
        };
        if let SessionStartupState::ExtractionFailed { reason } = &next {
            tracing::error!(filesystem = %filesystem.name, reason = %reason, "Extraction failed");
        }
        self.post(next);
    }
}

#[async_trait]
impl StateMachine for SessionStartupFsm {
    type Event = SessionStartupEvent;
    type State = SessionStartupState;

    async fn handle_event(&mut self, event: SessionStartupEvent) {
        tracing::debug!(
            state = ?self.state.borrow().underlying(),
            event = ?event,
            "Session startup received event"
        );

        if !self.transition_is_acceptable(&event) {
            let state = self.state.borrow().underlying().clone();
            tracing::warn!(event = ?event, state = ?state, "Illegal session startup transition");
            self.post(SessionStartupState::IllegalTransition {
                event: Box::new(event),
                state: Box::new(state),
            });
            return;
        }

        match event {
            SessionStartupEvent::SessionSelected { session } => self.select_session(session).await,
            SessionStartupEvent::RetrieveAssetLists { filesystem } => {
                self.retrieve_asset_lists(filesystem).await
            }
            SessionStartupEvent::GenerateDownloads {
                filesystem,
                asset_lists,
            } => self.generate_downloads(filesystem, asset_lists).await,
            SessionStartupEvent::DownloadAssets { requirements } => {
                self.download_assets(requirements).await
            }
            SessionStartupEvent::AssetDownloadComplete { download_id } => {
                self.asset_download_complete(download_id).await
            }
            SessionStartupEvent::SyncDownloadState => self.sync_download_state().await,
            SessionStartupEvent::CopyDownloadsToLocalStorage => {
                self.copy_downloads_to_local_storage().await
            }
            SessionStartupEvent::VerifyFilesystemAssets { filesystem } => {
                self.verify_filesystem_assets(filesystem).await
            }
            SessionStartupEvent::VerifyAvailableStorage => self.verify_available_storage().await,
            SessionStartupEvent::VerifyAvailableStorageComplete => {
                self.post(SessionStartupState::StorageSufficient)
            }
            SessionStartupEvent::ExtractFilesystem { filesystem } => {
                self.extract_filesystem(filesystem).await
            }
            SessionStartupEvent::ResetState => self.post(SessionStartupState::WaitingForSelection),
        }
    }

    fn subscribe(&self) -> watch::Receiver<SessionStartupState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
#[path = "fsm_test.rs"]
mod tests;
