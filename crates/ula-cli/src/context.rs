//! Wires the concrete collaborators into a running startup engine.

use anyhow::{Context as _, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

use ula_application::{
    AppsFilesystemDefaults, AppsStartupFsm, FsmHandle, SessionStartupFsm, StartupCoordinator,
    StartupPrompter,
};
use ula_core::asset::AssetResolver;
use ula_core::filesystem::FilesystemRepository;
use ula_core::session::SessionRepository;
use ula_infrastructure::{
    AssetDownloader, DiskStorageProbe, HttpDownloader, HttpManifestSource, LocalFilesystemManager,
    ProvisionConfig, TomlAssetCache, TomlStore, UlaPaths,
};

/// Configuration plus the session store, shared by every command.
pub struct AppContext {
    pub config: ProvisionConfig,
    pub paths: UlaPaths,
    pub store: Arc<TomlStore>,
}

impl AppContext {
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let config = match config_file {
            Some(path) => ProvisionConfig::load_or_create(path),
            None => ProvisionConfig::load_default(),
        }
        .context("Failed to load configuration")?;
        let paths = config.paths();
        let store = TomlStore::open(paths.store_file())
            .with_context(|| format!("Failed to open store in {}", paths.files_dir().display()))?;

        Ok(Self {
            config,
            paths,
            store: Arc::new(store),
        })
    }

    pub fn session_repository(&self) -> Arc<dyn SessionRepository> {
        self.store.clone()
    }

    pub fn filesystem_repository(&self) -> Arc<dyn FilesystemRepository> {
        self.store.clone()
    }

    /// Builds both state machines and the coordinator driving them.
    ///
    /// The returned task forwards download completions; it ends with the process.
    pub async fn startup_engine(
        &self,
        prompter: Arc<dyn StartupPrompter>,
    ) -> Result<(StartupCoordinator, JoinHandle<()>)> {
        let manifests = Arc::new(HttpManifestSource::new(
            self.config.manifest_base_url.clone(),
        )?);
        let cache = Arc::new(TomlAssetCache::new(self.paths.clone()));
        let resolver = Arc::new(AssetResolver::new(manifests, cache.clone()));

        let (backend, completions) = HttpDownloader::open(self.paths.download_jobs_file())?;
        let downloads = Arc::new(AssetDownloader::new(
            Arc::new(backend),
            cache,
            self.paths.clone(),
            self.config.download_base_url.clone(),
        ));
        if let Err(err) = downloads.prune_download_jobs().await {
            tracing::warn!("Failed to prune download jobs: {}", err);
        }

        let filesystems = Arc::new(LocalFilesystemManager::new(self.paths.clone()));
        let storage = Arc::new(DiskStorageProbe::new(self.paths.files_dir()));

        let session_fsm = SessionStartupFsm::new(
            self.store.as_ref(),
            self.filesystem_repository(),
            resolver,
            downloads.clone(),
            filesystems.clone(),
            storage,
        );
        let apps_fsm = AppsStartupFsm::new(
            self.session_repository(),
            self.filesystem_repository(),
            filesystems,
            AppsFilesystemDefaults {
                architecture: self.config.architecture.clone(),
                username: self.config.default_username.clone(),
                password: self.config.default_password.clone(),
                vnc_password: self.config.default_vnc_password.clone(),
            },
        );

        let coordinator = StartupCoordinator::new(
            Arc::new(FsmHandle::spawn(apps_fsm)),
            Arc::new(FsmHandle::spawn(session_fsm)),
            self.session_repository(),
            self.filesystem_repository(),
            downloads,
            prompter,
        );
        let forwarder = coordinator.forward_download_completions(completions);

        Ok((coordinator, forwarder))
    }
}
