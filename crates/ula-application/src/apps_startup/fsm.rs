//! Apps startup state machine.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use super::event::AppsStartupEvent;
use super::state::AppsStartupState;
use crate::machine::StateMachine;
use ula_core::app::App;
use ula_core::error::{Result, UlaError};
use ula_core::filesystem::{Filesystem, FilesystemRepository};
use ula_core::provision::AppScriptInstaller;
use ula_core::session::{ServiceLocation, ServiceType, Session, SessionRepository};

/// Values applied to apps filesystems created by the machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppsFilesystemDefaults {
    pub architecture: String,
    /// Empty credentials make the flow ask for them
    pub username: String,
    pub password: String,
    pub vnc_password: String,
}

/// Prepares the dedicated filesystem and session of a managed application.
pub struct AppsStartupFsm {
    state: watch::Sender<AppsStartupState>,
    session_repository: Arc<dyn SessionRepository>,
    filesystem_repository: Arc<dyn FilesystemRepository>,
    script_installer: Arc<dyn AppScriptInstaller>,
    defaults: AppsFilesystemDefaults,
}

impl AppsStartupFsm {
    pub fn new(
        session_repository: Arc<dyn SessionRepository>,
        filesystem_repository: Arc<dyn FilesystemRepository>,
        script_installer: Arc<dyn AppScriptInstaller>,
        defaults: AppsFilesystemDefaults,
    ) -> Self {
        let (state, _) = watch::channel(AppsStartupState::WaitingForAppSelection);
        Self {
            state,
            session_repository,
            filesystem_repository,
            script_installer,
            defaults,
        }
    }

    pub fn state(&self) -> AppsStartupState {
        self.state.borrow().clone()
    }

    #[cfg(test)]
    pub(crate) fn set_state(&self, state: AppsStartupState) {
        self.state.send_replace(state);
    }

    fn post(&self, state: AppsStartupState) {
        tracing::debug!(state = ?state, "Apps startup state changed");
        self.state.send_replace(state);
    }

    pub fn transition_is_acceptable(&self, event: &AppsStartupEvent) -> bool {
        use AppsStartupEvent as E;
        use AppsStartupState as S;

        let current = self.state.borrow();
        let current = current.underlying();
        match event {
            E::AppSelected { .. } => matches!(current, S::WaitingForAppSelection),
            E::CheckAppServiceLocation { .. } => {
                matches!(current, S::DatabaseEntriesFetched { .. })
            }
            E::SubmitAppServiceLocation { .. } => {
                matches!(current, S::AppRequiresServiceLocation)
            }
            E::CheckAppsFilesystemCredentials { .. } => {
                matches!(current, S::AppHasServiceLocationSet)
            }
            E::SubmitAppsFilesystemCredentials { .. } => {
                matches!(current, S::AppsFilesystemRequiresCredentials { .. })
            }
            E::CheckAppServiceType { .. } => matches!(current, S::AppsFilesystemHasCredentials),
            E::SubmitAppServiceType { .. } => matches!(current, S::AppRequiresServiceType),
            E::CopyAppScriptToFilesystem { .. } => matches!(current, S::AppHasServiceTypeSet),
            E::SyncDatabaseEntries { .. } => matches!(current, S::AppScriptCopySucceeded),
            E::ResetAppState => true,
        }
    }

    async fn fetch_database_entries(&self, app: App, service_location: ServiceLocation) {
        self.post(AppsStartupState::FetchingDatabaseEntries);

        let result = async {
            let filesystem_location = match service_location {
                ServiceLocation::Remote => ServiceLocation::Remote,
                _ => ServiceLocation::Local,
            };
            let filesystem = self
                .find_or_create_apps_filesystem(&app, filesystem_location)
                .await?;
            let session = self
                .find_or_create_apps_session(&app, &filesystem, service_location)
                .await?;
            Ok::<_, UlaError>((filesystem, session))
        }
        .await;

        match result {
            Ok((filesystem, session)) => {
                tracing::info!(
                    app = %app.name,
                    filesystem_id = filesystem.id,
                    session_id = session.id,
                    "Apps database entries fetched"
                );
                self.post(AppsStartupState::DatabaseEntriesFetched {
                    filesystem,
                    session,
                });
            }
            Err(err) => {
                tracing::error!(app = %app.name, "Failed to fetch apps database entries: {}", err);
                self.post(AppsStartupState::DatabaseEntriesFetchFailed);
            }
        }
    }

    async fn find_or_create_apps_filesystem(
        &self,
        app: &App,
        location: ServiceLocation,
    ) -> Result<Filesystem> {
        let distribution = &app.filesystem_required;
        if let Some(filesystem) = self
            .filesystem_repository
            .find_apps_filesystem(distribution, location)
            .await?
        {
            return Ok(filesystem);
        }

        let mut filesystem = Filesystem::new(
            format!("apps-{}-{}", distribution, location),
            distribution.as_str(),
            self.defaults.architecture.as_str(),
        );
        filesystem.location = location;
        filesystem.is_apps_filesystem = true;
        filesystem.set_credentials(
            self.defaults.username.as_str(),
            self.defaults.password.as_str(),
            self.defaults.vnc_password.as_str(),
        );
        match self.filesystem_repository.insert(&filesystem).await {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                tracing::warn!(name = %filesystem.name, "Apps filesystem inserted concurrently: {}", err);
            }
            Err(err) => return Err(err),
        }

        self.filesystem_repository
            .find_apps_filesystem(distribution, location)
            .await?
            .ok_or_else(|| UlaError::not_found("filesystem", filesystem.name))
    }

    async fn find_or_create_apps_session(
        &self,
        app: &App,
        filesystem: &Filesystem,
        service_location: ServiceLocation,
    ) -> Result<Session> {
        if let Some(session) = self.session_repository.find_apps_session(&app.name).await? {
            return Ok(session);
        }

        let mut session = Session::new(app.name.as_str(), filesystem.id);
        session.filesystem_name = filesystem.name.clone();
        session.service_location = service_location;
        session.is_apps_session = true;
        match self.session_repository.insert(&session).await {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                tracing::warn!(name = %session.name, "Apps session inserted concurrently: {}", err);
            }
            Err(err) => return Err(err),
        }

        self.session_repository
            .find_apps_session(&app.name)
            .await?
            .ok_or_else(|| UlaError::not_found("session", app.name.clone()))
    }

    fn check_app_service_location(&self, session: &Session) {
        if session.service_location.is_selected() {
            self.post(AppsStartupState::AppHasServiceLocationSet);
        } else {
            self.post(AppsStartupState::AppRequiresServiceLocation);
        }
    }

    async fn persist_session(&self, session: &Session, next: AppsStartupState) {
        match self.session_repository.update(session).await {
            Ok(()) => self.post(next),
            Err(err) => {
                tracing::error!(session = %session.name, "Failed to update apps session: {}", err);
                self.post(AppsStartupState::DatabaseEntriesFetchFailed);
            }
        }
    }

    async fn submit_app_service_location(
        &self,
        mut session: Session,
        service_location: ServiceLocation,
    ) {
        session.service_location = service_location;
        self.persist_session(&session, AppsStartupState::AppHasServiceLocationSet)
            .await;
    }

    fn check_apps_filesystem_credentials(&self, filesystem: Filesystem) {
        if filesystem.credentials_are_set() {
            self.post(AppsStartupState::AppsFilesystemHasCredentials);
        } else {
            self.post(AppsStartupState::AppsFilesystemRequiresCredentials { filesystem });
        }
    }

    async fn submit_apps_filesystem_credentials(
        &self,
        mut filesystem: Filesystem,
        username: String,
        password: String,
        vnc_password: String,
    ) {
        filesystem.set_credentials(username, password, vnc_password);
        match self.filesystem_repository.update(&filesystem).await {
            Ok(()) => self.post(AppsStartupState::AppsFilesystemHasCredentials),
            Err(err) => {
                tracing::error!(filesystem = %filesystem.name, "Failed to store credentials: {}", err);
                self.post(AppsStartupState::DatabaseEntriesFetchFailed);
            }
        }
    }

    async fn check_app_service_type(&self, app: App, mut session: Session) {
        if session.service_type.is_selected() {
            self.post(AppsStartupState::AppHasServiceTypeSet);
            return;
        }

        match app.implied_service_type() {
            Some(service_type) => {
                tracing::info!(app = %app.name, %service_type, "Service type implied by app");
                session.set_service_type(service_type);
                self.persist_session(&session, AppsStartupState::AppHasServiceTypeSet)
                    .await;
            }
            None => self.post(AppsStartupState::AppRequiresServiceType),
        }
    }

    async fn submit_app_service_type(&self, mut session: Session, service_type: ServiceType) {
        session.set_service_type(service_type);
        self.persist_session(&session, AppsStartupState::AppHasServiceTypeSet)
            .await;
    }

    async fn copy_app_script(&self, app: App, filesystem: Filesystem) {
        self.post(AppsStartupState::CopyingAppScript);

        match self
            .script_installer
            .copy_app_script(&app.name, &filesystem)
            .await
        {
            Ok(()) => self.post(AppsStartupState::AppScriptCopySucceeded),
            Err(err) => {
                tracing::error!(app = %app.name, "Failed to copy app script: {}", err);
                self.post(AppsStartupState::AppScriptCopyFailed {
                    reason: err.to_string(),
                });
            }
        }
    }

    async fn sync_database_entries(&self, app: App, mut session: Session, filesystem: Filesystem) {
        self.post(AppsStartupState::SyncingDatabaseEntries);

        session.filesystem_id = filesystem.id;
        session.filesystem_name = filesystem.name.clone();
        session.username = filesystem.default_username.clone();
        session.password = filesystem.default_password.clone();
        session.vnc_password = filesystem.default_vnc_password.clone();

        match self.session_repository.update(&session).await {
            Ok(()) => self.post(AppsStartupState::AppDatabaseEntriesSynced {
                app,
                session,
                filesystem,
            }),
            Err(err) => {
                tracing::error!(session = %session.name, "Failed to sync apps session: {}", err);
                self.post(AppsStartupState::DatabaseEntriesFetchFailed);
            }
        }
    }
}

#[async_trait]
impl StateMachine for AppsStartupFsm {
    type Event = AppsStartupEvent;
    type State = AppsStartupState;

    async fn handle_event(&mut self, event: AppsStartupEvent) {
        tracing::debug!(
            state = ?self.state.borrow().underlying(),
            event = ?event,
            "Apps startup received event"
        );

        if !self.transition_is_acceptable(&event) {
            let state = self.state.borrow().underlying().clone();
            tracing::warn!(event = ?event, state = ?state, "Illegal apps startup transition");
            self.post(AppsStartupState::IllegalTransition {
                event: Box::new(event),
                state: Box::new(state),
            });
            return;
        }

        match event {
            AppsStartupEvent::AppSelected {
                app,
                service_location,
            } => self.fetch_database_entries(app, service_location).await,
            AppsStartupEvent::CheckAppServiceLocation { session } => {
                self.check_app_service_location(&session)
            }
            AppsStartupEvent::SubmitAppServiceLocation {
                session,
                service_location,
            } => {
                self.submit_app_service_location(session, service_location)
                    .await
            }
            AppsStartupEvent::CheckAppsFilesystemCredentials { filesystem } => {
                self.check_apps_filesystem_credentials(filesystem)
            }
            AppsStartupEvent::SubmitAppsFilesystemCredentials {
                filesystem,
                username,
                password,
                vnc_password,
            } => {
                self.submit_apps_filesystem_credentials(filesystem, username, password, vnc_password)
                    .await
            }
            AppsStartupEvent::CheckAppServiceType { app, session } => {
                self.check_app_service_type(app, session).await
            }
            AppsStartupEvent::SubmitAppServiceType {
                session,
                service_type,
            } => self.submit_app_service_type(session, service_type).await,
            AppsStartupEvent::CopyAppScriptToFilesystem { app, filesystem } => {
                self.copy_app_script(app, filesystem).await
            }
            AppsStartupEvent::SyncDatabaseEntries {
                app,
                session,
                filesystem,
            } => self.sync_database_entries(app, session, filesystem).await,
            AppsStartupEvent::ResetAppState => self.post(AppsStartupState::WaitingForAppSelection),
        }
    }

    fn subscribe(&self) -> watch::Receiver<AppsStartupState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
#[path = "fsm_test.rs"]
mod tests;
