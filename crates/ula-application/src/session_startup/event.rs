//! Session startup events.

use ula_core::asset::AssetList;
use ula_core::download::{DownloadId, DownloadRequirement};
use ula_core::filesystem::Filesystem;
use ula_core::session::Session;

/// Inputs accepted by the session startup machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStartupEvent {
    SessionSelected {
        session: Session,
    },
    RetrieveAssetLists {
        filesystem: Filesystem,
    },
    GenerateDownloads {
        filesystem: Filesystem,
        asset_lists: Vec<AssetList>,
    },
    DownloadAssets {
        requirements: Vec<DownloadRequirement>,
    },
    AssetDownloadComplete {
        download_id: DownloadId,
    },
    /// Re-synchronise with downloads issued before a restart
    SyncDownloadState,
    CopyDownloadsToLocalStorage,
    VerifyFilesystemAssets {
        filesystem: Filesystem,
    },
    VerifyAvailableStorage,
    /// The caller accepts low storage and wants to continue
    VerifyAvailableStorageComplete,
    ExtractFilesystem {
        filesystem: Filesystem,
    },
    ResetState,
}
