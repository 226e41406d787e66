//! Session startup states.

use super::event::SessionStartupEvent;
use ula_core::asset::AssetList;
use ula_core::download::DownloadRequirement;
use ula_core::filesystem::Filesystem;
use ula_core::session::Session;

/// Every position of the session provisioning protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStartupState {
    #[default]
    WaitingForSelection,
    SingleSessionNotAllowed,
    SessionRestartable {
        session: Session,
    },
    ReadyForPreparation {
        session: Session,
        filesystem: Filesystem,
    },
    /// The selected session's filesystem is not in the store
    SessionFilesystemMissing {
        session: Session,
    },

    RetrievingAssetLists,
    AssetListsFailed,
    AssetListsSucceeded {
        asset_lists: Vec<AssetList>,
    },

    GeneratingDownloadRequirements,
    RemoteUnreachable,
    NoDownloadsRequired,
    DownloadsRequired {
        requirements: Vec<DownloadRequirement>,
        large_download_required: bool,
    },

    Downloading {
        completed: usize,
        total: usize,
    },
    DownloadsSucceeded,
    DownloadsFailed {
        reason: String,
    },
    CacheAccessedWhileEmpty,
    CacheAccessedInWrongState,

    CopyingLocally,
    LocalCopySucceeded,
    LocalCopyFailed {
        reason: String,
    },

    VerifyingFilesystemAssets,
    AssetsMissingFromSupport,
    FilesystemCopyFailed {
        reason: String,
    },
    FilesystemAssetsVerified,

    VerifyingStorage,
    StorageInsufficient {
        available_mb: u64,
    },
    StorageLow {
        available_mb: u64,
    },
    StorageSufficient,

    Extracting {
        line: String,
    },
    ExtractionSucceeded,
    ExtractionFailed {
        reason: String,
    },

    /// An event was rejected; `state` is where the machine still stands.
    IllegalTransition {
        event: Box<SessionStartupEvent>,
        state: Box<SessionStartupState>,
    },
}

impl SessionStartupState {
    /// The protocol position, looking through a rejected-event wrapper.
    pub fn underlying(&self) -> &SessionStartupState {
        match self {
            SessionStartupState::IllegalTransition { state, .. } => state.underlying(),
            other => other,
        }
    }

    /// Whether the session flow ends in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStartupState::SingleSessionNotAllowed
                | SessionStartupState::SessionRestartable { .. }
                | SessionStartupState::SessionFilesystemMissing { .. }
                | SessionStartupState::AssetListsFailed
                | SessionStartupState::RemoteUnreachable
                | SessionStartupState::DownloadsFailed { .. }
                | SessionStartupState::CacheAccessedWhileEmpty
                | SessionStartupState::CacheAccessedInWrongState
                | SessionStartupState::LocalCopyFailed { .. }
                | SessionStartupState::FilesystemCopyFailed { .. }
                | SessionStartupState::StorageInsufficient { .. }
                | SessionStartupState::ExtractionSucceeded
                | SessionStartupState::ExtractionFailed { .. }
        )
    }
}
