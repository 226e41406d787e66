//! Apps startup states.

use super::event::AppsStartupEvent;
use ula_core::app::App;
use ula_core::filesystem::Filesystem;
use ula_core::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AppsStartupState {
    #[default]
    WaitingForAppSelection,
    FetchingDatabaseEntries,
    DatabaseEntriesFetched {
        filesystem: Filesystem,
        session: Session,
    },
    DatabaseEntriesFetchFailed,
    AppRequiresServiceLocation,
    AppHasServiceLocationSet,
    AppsFilesystemRequiresCredentials {
        filesystem: Filesystem,
    },
    AppsFilesystemHasCredentials,
    AppRequiresServiceType,
    AppHasServiceTypeSet,
    CopyingAppScript,
    AppScriptCopySucceeded,
    AppScriptCopyFailed {
        reason: String,
    },
    SyncingDatabaseEntries,
    AppDatabaseEntriesSynced {
        app: App,
        session: Session,
        filesystem: Filesystem,
    },
    IllegalTransition {
        event: Box<AppsStartupEvent>,
        state: Box<AppsStartupState>,
    },
}

impl AppsStartupState {
    /// The protocol position, looking through a rejected-event wrapper.
    pub fn underlying(&self) -> &AppsStartupState {
        match self {
            AppsStartupState::IllegalTransition { state, .. } => state.underlying(),
            other => other,
        }
    }
}
