//! Startup coordination.
//!
//! `StartupCoordinator` observes both state machines and submits the event
//! that follows each state, asking a [`StartupPrompter`] whenever a decision
//! belongs to the user. It chains the apps flow into the session flow.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::apps_startup::{AppsStartupEvent, AppsStartupState};
use crate::machine::FsmHandle;
use crate::session_startup::{SessionStartupEvent, SessionStartupState};
use ula_core::app::App;
use ula_core::download::{DownloadCoordinator, DownloadId, DownloadRequirement};
use ula_core::error::{Result, UlaError};
use ula_core::filesystem::{Filesystem, FilesystemRepository};
use ula_core::session::{ServiceLocation, ServiceType, Session, SessionRepository};

pub type SessionStartupHandle = FsmHandle<SessionStartupEvent, SessionStartupState>;
pub type AppsStartupHandle = FsmHandle<AppsStartupEvent, AppsStartupState>;

/// Credentials entered for an apps filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemCredentials {
    pub username: String,
    pub password: String,
    pub vnc_password: String,
}

/// User decisions requested while starting up.
///
/// Returning `None` (or `false`) cancels the startup.
#[async_trait]
pub trait StartupPrompter: Send + Sync {
    async fn service_location(&self, app: &App) -> Option<ServiceLocation>;

    async fn filesystem_credentials(&self, filesystem: &Filesystem) -> Option<FilesystemCredentials>;

    async fn service_type(&self, app: &App) -> Option<ServiceType>;

    async fn confirm_large_download(&self, requirements: &[DownloadRequirement]) -> bool;

    async fn confirm_low_storage(&self, available_mb: u64) -> bool;

    /// Called for every session state observed. Used for progress reporting.
    fn session_state_changed(&self, _state: &SessionStartupState) {}
}

/// How a startup run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// The filesystem is extracted and verified; the session can be started
    SessionReady {
        session: Session,
        filesystem: Filesystem,
    },
    SessionRestartable {
        session: Session,
    },
    SingleSessionNotAllowed,
    /// The user declined a decision
    Cancelled {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl StartupOutcome {
    fn failed(reason: impl Into<String>) -> Self {
        StartupOutcome::Failed {
            reason: reason.into(),
        }
    }

    fn cancelled(reason: impl Into<String>) -> Self {
        StartupOutcome::Cancelled {
            reason: reason.into(),
        }
    }
}

/// Either keeps a run going with `T` or ends it with an outcome.
type Step<T> = std::result::Result<T, StartupOutcome>;

/// What the session flow has learned so far.
#[derive(Default)]
struct SessionFlow {
    session: Option<Session>,
    filesystem: Option<Filesystem>,
    support_retried: bool,
}

impl SessionFlow {
    fn filesystem(&self) -> Step<Filesystem> {
        self.filesystem
            .clone()
            .ok_or_else(|| StartupOutcome::failed("No filesystem selected"))
    }
}

pub struct StartupCoordinator {
    apps: Arc<AppsStartupHandle>,
    session: Arc<SessionStartupHandle>,
    session_repository: Arc<dyn SessionRepository>,
    filesystem_repository: Arc<dyn FilesystemRepository>,
    downloads: Arc<dyn DownloadCoordinator>,
    prompter: Arc<dyn StartupPrompter>,
}

impl StartupCoordinator {
    pub fn new(
        apps: Arc<AppsStartupHandle>,
        session: Arc<SessionStartupHandle>,
        session_repository: Arc<dyn SessionRepository>,
        filesystem_repository: Arc<dyn FilesystemRepository>,
        downloads: Arc<dyn DownloadCoordinator>,
        prompter: Arc<dyn StartupPrompter>,
    ) -> Self {
        Self {
            apps,
            session,
            session_repository,
            filesystem_repository,
            downloads,
            prompter,
        }
    }

    /// Forwards download completion signals to the session machine.
    pub fn forward_download_completions(
        &self,
        mut completions: mpsc::UnboundedReceiver<DownloadId>,
    ) -> JoinHandle<()> {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            while let Some(download_id) = completions.recv().await {
                session.submit_event(SessionStartupEvent::AssetDownloadComplete { download_id });
            }
        })
    }

    fn reset(&self) {
        self.apps.submit_event(AppsStartupEvent::ResetAppState);
        self.session.submit_event(SessionStartupEvent::ResetState);
    }

    /// Provisions `session`, resuming downloads persisted by an earlier run.
    pub async fn start_session(&self, session: Session) -> StartupOutcome {
        let mut rx = self.session.observe_state();
        let _ = rx.borrow_and_update();
        self.session.submit_event(SessionStartupEvent::ResetState);

        let mut flow = SessionFlow::default();
        if self.downloads.has_persisted_state().await {
            // Resuming skips selection, so the single-session rule is applied here.
            match self.running_session_outcome(&session).await {
                Ok(None) => {}
                Ok(Some(outcome)) => {
                    self.reset();
                    return outcome;
                }
                Err(err) => {
                    self.reset();
                    return StartupOutcome::failed(err.to_string());
                }
            }
            match self.find_filesystem(session.filesystem_id).await {
                Ok(filesystem) => {
                    tracing::info!(session = %session.name, "Resuming persisted downloads");
                    flow.session = Some(session);
                    flow.filesystem = Some(filesystem);
                    self.session.submit_event(SessionStartupEvent::SyncDownloadState);
                }
                Err(err) => {
                    self.reset();
                    return StartupOutcome::failed(err.to_string());
                }
            }
        } else {
            self.session
                .submit_event(SessionStartupEvent::SessionSelected { session });
        }

        let outcome = self.drive_session(flow, &mut rx).await;
        self.reset();
        outcome
    }

    /// Prepares the app's session, then provisions it.
    pub async fn start_app(&self, app: App, service_location: ServiceLocation) -> StartupOutcome {
        let mut rx = self.apps.observe_state();
        let _ = rx.borrow_and_update();
        self.apps.submit_event(AppsStartupEvent::ResetAppState);
        self.apps.submit_event(AppsStartupEvent::AppSelected {
            app: app.clone(),
            service_location,
        });

        let outcome = match self.drive_apps(&app, &mut rx).await {
            Ok(session) => return self.start_session(session).await,
            Err(outcome) => outcome,
        };
        self.reset();
        outcome
    }

    /// The outcome ending the run when some session is already active.
    async fn running_session_outcome(&self, session: &Session) -> Result<Option<StartupOutcome>> {
        let active = self.session_repository.find_active_sessions().await?;
        if active.is_empty() {
            return Ok(None);
        }
        if let Some(running) = active.into_iter().find(|running| running.id == session.id) {
            return Ok(Some(StartupOutcome::SessionRestartable { session: running }));
        }
        tracing::info!(session = %session.name, "Another session is running, not resuming downloads");
        Ok(Some(StartupOutcome::SingleSessionNotAllowed))
    }

    async fn find_session(&self, id: i64) -> Result<Session> {
        self.session_repository
            .list_all()
            .await?
            .into_iter()
            .find(|session| session.id == id)
            .ok_or_else(|| UlaError::not_found("session", id.to_string()))
    }

    async fn find_filesystem(&self, id: i64) -> Result<Filesystem> {
        self.filesystem_repository
            .list_all()
            .await?
            .into_iter()
            .find(|filesystem| filesystem.id == id)
            .ok_or_else(|| UlaError::not_found("filesystem", id.to_string()))
    }

    async fn drive_apps(
        &self,
        app: &App,
        rx: &mut watch::Receiver<AppsStartupState>,
    ) -> Step<Session> {
        let mut entries: Option<(Session, Filesystem)> = None;

        loop {
            if rx.changed().await.is_err() {
                return Err(StartupOutcome::failed("Apps state machine stopped"));
            }
            let state = rx.borrow_and_update().clone();
            tracing::debug!(state = ?state, "Apps startup progressed");

            let event = match state {
                AppsStartupState::WaitingForAppSelection
                | AppsStartupState::FetchingDatabaseEntries
                | AppsStartupState::CopyingAppScript
                | AppsStartupState::SyncingDatabaseEntries => continue,
                AppsStartupState::DatabaseEntriesFetched {
                    filesystem,
                    session,
                } => {
                    entries = Some((session.clone(), filesystem));
                    AppsStartupEvent::CheckAppServiceLocation { session }
                }
                AppsStartupState::AppRequiresServiceLocation => {
                    let (session, _) = self.refresh(&entries).await?;
                    match self.prompter.service_location(app).await {
                        Some(service_location) => AppsStartupEvent::SubmitAppServiceLocation {
                            session,
                            service_location,
                        },
                        None => return Err(StartupOutcome::cancelled("No service location chosen")),
                    }
                }
                AppsStartupState::AppHasServiceLocationSet => {
                    let (_, filesystem) = self.refresh(&entries).await?;
                    AppsStartupEvent::CheckAppsFilesystemCredentials { filesystem }
                }
                AppsStartupState::AppsFilesystemRequiresCredentials { filesystem } => {
                    match self.prompter.filesystem_credentials(&filesystem).await {
                        Some(credentials) => AppsStartupEvent::SubmitAppsFilesystemCredentials {
                            filesystem,
                            username: credentials.username,
                            password: credentials.password,
                            vnc_password: credentials.vnc_password,
                        },
                        None => return Err(StartupOutcome::cancelled("No credentials entered")),
                    }
                }
                AppsStartupState::AppsFilesystemHasCredentials => {
                    let (session, _) = self.refresh(&entries).await?;
                    AppsStartupEvent::CheckAppServiceType {
                        app: app.clone(),
                        session,
                    }
                }
                AppsStartupState::AppRequiresServiceType => {
                    let (session, _) = self.refresh(&entries).await?;
                    match self.prompter.service_type(app).await {
                        Some(service_type) => AppsStartupEvent::SubmitAppServiceType {
                            session,
                            service_type,
                        },
                        None => return Err(StartupOutcome::cancelled("No service type chosen")),
                    }
                }
                AppsStartupState::AppHasServiceTypeSet => {
                    let (_, filesystem) = self.refresh(&entries).await?;
                    AppsStartupEvent::CopyAppScriptToFilesystem {
                        app: app.clone(),
                        filesystem,
                    }
                }
                AppsStartupState::AppScriptCopySucceeded => {
                    let (session, filesystem) = self.refresh(&entries).await?;
                    AppsStartupEvent::SyncDatabaseEntries {
                        app: app.clone(),
                        session,
                        filesystem,
                    }
                }
                AppsStartupState::AppScriptCopyFailed { reason } => {
                    return Err(StartupOutcome::failed(format!(
                        "Couldn't copy app script: {}",
                        reason
                    )));
                }
                AppsStartupState::DatabaseEntriesFetchFailed => {
                    return Err(StartupOutcome::failed("Couldn't fetch apps database entries"));
                }
                AppsStartupState::AppDatabaseEntriesSynced { session, .. } => return Ok(session),
                AppsStartupState::IllegalTransition { event, state } => {
                    return Err(StartupOutcome::failed(format!(
                        "Bad apps transition: {:?} in {:?}",
                        event, state
                    )));
                }
            };
            self.apps.submit_event(event);
        }
    }

    /// Reloads the apps entries so the next event carries what was persisted.
    async fn refresh(
        &self,
        entries: &Option<(Session, Filesystem)>,
    ) -> Step<(Session, Filesystem)> {
        let (session, filesystem) = entries
            .as_ref()
            .ok_or_else(|| StartupOutcome::failed("Apps entries were never fetched"))?;
        let reload = async {
            Ok::<_, UlaError>((
                self.find_session(session.id).await?,
                self.find_filesystem(filesystem.id).await?,
            ))
        };
        reload
            .await
            .map_err(|err| StartupOutcome::failed(err.to_string()))
    }

    async fn drive_session(
        &self,
        mut flow: SessionFlow,
        rx: &mut watch::Receiver<SessionStartupState>,
    ) -> StartupOutcome {
        loop {
            if rx.changed().await.is_err() {
                return StartupOutcome::failed("Session state machine stopped");
            }
            let state = rx.borrow_and_update().clone();
            self.prompter.session_state_changed(&state);

            match self.next_session_event(&mut flow, state).await {
                Ok(Some(event)) => self.session.submit_event(event),
                Ok(None) => {}
                Err(outcome) => {
                    tracing::info!(outcome = ?outcome, "Session startup finished");
                    return outcome;
                }
            }
        }
    }

    async fn next_session_event(
        &self,
        flow: &mut SessionFlow,
        state: SessionStartupState,
    ) -> Step<Option<SessionStartupEvent>> {
        use SessionStartupState as S;

        let event = match state {
            S::WaitingForSelection
            | S::RetrievingAssetLists
            | S::GeneratingDownloadRequirements
            | S::Downloading { .. }
            | S::CopyingLocally
            | S::VerifyingFilesystemAssets
            | S::VerifyingStorage
            | S::Extracting { .. } => return Ok(None),

            S::SingleSessionNotAllowed => return Err(StartupOutcome::SingleSessionNotAllowed),
            S::SessionRestartable { session } => {
                return Err(StartupOutcome::SessionRestartable { session });
            }
            S::SessionFilesystemMissing { session } => {
                return Err(StartupOutcome::failed(format!(
                    "Filesystem of session '{}' does not exist",
                    session.name
                )));
            }
            S::ReadyForPreparation {
                session,
                filesystem,
            } => {
                flow.session = Some(session);
                flow.filesystem = Some(filesystem.clone());
                SessionStartupEvent::RetrieveAssetLists { filesystem }
            }
            S::AssetListsSucceeded { asset_lists } => SessionStartupEvent::GenerateDownloads {
                filesystem: flow.filesystem()?,
                asset_lists,
            },
            S::AssetListsFailed => return Err(StartupOutcome::failed("Failed to retrieve asset lists")),
            S::RemoteUnreachable => {
                return Err(StartupOutcome::failed(
                    "Assets must be downloaded but the remote host is unreachable",
                ));
            }
            S::DownloadsRequired {
                requirements,
                large_download_required,
            } => {
                if large_download_required
                    && !self.prompter.confirm_large_download(&requirements).await
                {
                    return Err(StartupOutcome::cancelled("Large download declined"));
                }
                SessionStartupEvent::DownloadAssets { requirements }
            }
            S::NoDownloadsRequired | S::LocalCopySucceeded => {
                SessionStartupEvent::VerifyFilesystemAssets {
                    filesystem: flow.filesystem()?,
                }
            }
            S::DownloadsSucceeded => SessionStartupEvent::CopyDownloadsToLocalStorage,
            S::DownloadsFailed { reason } => return Err(StartupOutcome::failed(reason)),
            S::CacheAccessedWhileEmpty => {
                return Err(StartupOutcome::failed("Download cache was accessed while empty"));
            }
            S::CacheAccessedInWrongState => {
                return Err(StartupOutcome::failed(
                    "Download cache was accessed in the wrong state",
                ));
            }
            S::LocalCopyFailed { reason } => {
                return Err(StartupOutcome::failed(format!(
                    "Failed to copy assets to local storage: {}",
                    reason
                )));
            }
            S::AssetsMissingFromSupport => {
                if flow.support_retried {
                    return Err(StartupOutcome::failed("Filesystem is missing assets"));
                }
                flow.support_retried = true;
                SessionStartupEvent::RetrieveAssetLists {
                    filesystem: flow.filesystem()?,
                }
            }
            S::FilesystemCopyFailed { reason } => {
                return Err(StartupOutcome::failed(format!(
                    "Failed to copy assets to filesystem: {}",
                    reason
                )));
            }
            S::FilesystemAssetsVerified => SessionStartupEvent::VerifyAvailableStorage,
            S::StorageInsufficient { available_mb } => {
                return Err(StartupOutcome::failed(format!(
                    "Insufficient storage: {} MB available",
                    available_mb
                )));
            }
            S::StorageLow { available_mb } => {
                if !self.prompter.confirm_low_storage(available_mb).await {
                    return Err(StartupOutcome::cancelled("Low storage declined"));
                }
                SessionStartupEvent::VerifyAvailableStorageComplete
            }
            S::StorageSufficient => SessionStartupEvent::ExtractFilesystem {
                filesystem: flow.filesystem()?,
            },
            S::ExtractionSucceeded => {
                let filesystem = flow.filesystem()?;
                let session = flow
                    .session
                    .clone()
                    .ok_or_else(|| StartupOutcome::failed("No session selected"))?;
                return Err(StartupOutcome::SessionReady {
                    session,
                    filesystem,
                });
            }
            S::ExtractionFailed { reason } => {
                return Err(StartupOutcome::failed(format!(
                    "Failed to extract filesystem: {}",
                    reason
                )));
            }
            S::IllegalTransition { event, state } => {
                return Err(StartupOutcome::failed(format!(
                    "Bad session transition: {:?} in {:?}",
                    event, state
                )));
            }
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
