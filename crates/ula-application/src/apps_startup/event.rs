//! Apps startup events.

use ula_core::app::App;
use ula_core::filesystem::Filesystem;
use ula_core::session::{ServiceLocation, ServiceType, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppsStartupEvent {
    AppSelected {
        app: App,
        service_location: ServiceLocation,
    },
    CheckAppServiceLocation {
        session: Session,
    },
    SubmitAppServiceLocation {
        session: Session,
        service_location: ServiceLocation,
    },
    CheckAppsFilesystemCredentials {
        filesystem: Filesystem,
    },
    SubmitAppsFilesystemCredentials {
        filesystem: Filesystem,
        username: String,
        password: String,
        vnc_password: String,
    },
    CheckAppServiceType {
        app: App,
        session: Session,
    },
    SubmitAppServiceType {
        session: Session,
        service_type: ServiceType,
    },
    CopyAppScriptToFilesystem {
        app: App,
        filesystem: Filesystem,
    },
    SyncDatabaseEntries {
        app: App,
        session: Session,
        filesystem: Filesystem,
    },
    ResetAppState,
}
