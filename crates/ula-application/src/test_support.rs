//! In-memory collaborators shared by the state machine tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use ula_core::asset::{Asset, AssetCache, AssetResolver, ManifestError, ManifestSource};
use ula_core::download::{DownloadCompletion, DownloadCoordinator, DownloadId, DownloadRequirement};
use ula_core::error::{Result, UlaError};
use ula_core::filesystem::{Filesystem, FilesystemRepository};
use ula_core::provision::{AppScriptInstaller, ExtractionOutcome, FilesystemExtractor, StorageProbe};
use ula_core::session::{ServiceLocation, Session, SessionRepository};

// ============================================================================
// Store
// ============================================================================

pub struct MockStore {
    sessions: Mutex<Vec<Session>>,
    filesystems: Mutex<Vec<Filesystem>>,
    sessions_tx: watch::Sender<Vec<Session>>,
    active_tx: watch::Sender<Vec<Session>>,
    filesystems_tx: watch::Sender<Vec<Filesystem>>,
    next_id: AtomicI64,
    pub fail_inserts: AtomicBool,
    pub fail_updates: AtomicBool,
    /// Simulates a concurrent writer: the row lands but the insert reports Conflict
    pub conflict_on_insert: AtomicBool,
    /// Inserts succeed but the row never becomes visible
    pub drop_inserts: AtomicBool,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(Vec::new()),
            filesystems: Mutex::new(Vec::new()),
            sessions_tx: watch::channel(Vec::new()).0,
            active_tx: watch::channel(Vec::new()).0,
            filesystems_tx: watch::channel(Vec::new()).0,
            next_id: AtomicI64::new(1),
            fail_inserts: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            conflict_on_insert: AtomicBool::new(false),
            drop_inserts: AtomicBool::new(false),
        })
    }

    fn publish(&self) {
        let sessions = self.sessions.lock().unwrap().clone();
        let active = sessions.iter().filter(|s| s.active).cloned().collect();
        self.sessions_tx.send_replace(sessions);
        self.active_tx.send_replace(active);
        let filesystems = self.filesystems.lock().unwrap().clone();
        self.filesystems_tx.send_replace(filesystems);
    }

    pub fn add_session(&self, mut session: Session) -> Session {
        session.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().push(session.clone());
        self.publish();
        session
    }

    pub fn add_filesystem(&self, mut filesystem: Filesystem) -> Filesystem {
        filesystem.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.filesystems.lock().unwrap().push(filesystem.clone());
        self.publish();
        filesystem
    }

    pub fn session(&self, id: i64) -> Option<Session> {
        self.sessions.lock().unwrap().iter().find(|s| s.id == id).cloned()
    }

    pub fn filesystem(&self, id: i64) -> Option<Filesystem> {
        self.filesystems
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.id == id)
            .cloned()
    }

    pub fn filesystem_count(&self) -> usize {
        self.filesystems.lock().unwrap().len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn check_insert(&self) -> Result<bool> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(UlaError::data_access("insert failed"));
        }
        Ok(!self.drop_inserts.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl SessionRepository for MockStore {
    fn watch_all(&self) -> watch::Receiver<Vec<Session>> {
        self.sessions_tx.subscribe()
    }

    fn watch_active(&self) -> watch::Receiver<Vec<Session>> {
        self.active_tx.subscribe()
    }

    async fn list_all(&self) -> Result<Vec<Session>> {
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn find_apps_session(&self, app_name: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.is_apps_session && s.name == app_name)
            .cloned())
    }

    async fn find_active_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.active_tx.borrow().clone())
    }

    async fn insert(&self, session: &Session) -> Result<()> {
        if !self.check_insert()? {
            return Ok(());
        }
        if self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.name == session.name && s.is_apps_session == session.is_apps_session)
        {
            return Err(UlaError::conflict("session", &session.name));
        }
        self.add_session(session.clone());
        if self.conflict_on_insert.load(Ordering::SeqCst) {
            return Err(UlaError::conflict("session", &session.name));
        }
        Ok(())
    }

    async fn update(&self, session: &Session) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(UlaError::data_access("update failed"));
        }
        {
            let mut sessions = self.sessions.lock().unwrap();
            let slot = sessions
                .iter_mut()
                .find(|s| s.id == session.id)
                .ok_or_else(|| UlaError::not_found("session", session.id.to_string()))?;
            *slot = session.clone();
        }
        self.publish();
        Ok(())
    }
}

#[async_trait]
impl FilesystemRepository for MockStore {
    fn watch_all(&self) -> watch::Receiver<Vec<Filesystem>> {
        self.filesystems_tx.subscribe()
    }

    async fn list_all(&self) -> Result<Vec<Filesystem>> {
        Ok(self.filesystems.lock().unwrap().clone())
    }

    async fn find_apps_filesystem(
        &self,
        distribution_type: &str,
        location: ServiceLocation,
    ) -> Result<Option<Filesystem>> {
        Ok(self
            .filesystems
            .lock()
            .unwrap()
            .iter()
            .find(|f| {
                f.is_apps_filesystem
                    && f.distribution_type == distribution_type
                    && f.location == location
            })
            .cloned())
    }

    async fn insert(&self, filesystem: &Filesystem) -> Result<()> {
        if !self.check_insert()? {
            return Ok(());
        }
        if self
            .filesystems
            .lock()
            .unwrap()
            .iter()
            .any(|f| {
                f.name == filesystem.name && f.is_apps_filesystem == filesystem.is_apps_filesystem
            })
        {
            return Err(UlaError::conflict("filesystem", &filesystem.name));
        }
        self.add_filesystem(filesystem.clone());
        if self.conflict_on_insert.load(Ordering::SeqCst) {
            return Err(UlaError::conflict("filesystem", &filesystem.name));
        }
        Ok(())
    }

    async fn update(&self, filesystem: &Filesystem) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(UlaError::data_access("update failed"));
        }
        {
            let mut filesystems = self.filesystems.lock().unwrap();
            let slot = filesystems
                .iter_mut()
                .find(|f| f.id == filesystem.id)
                .ok_or_else(|| UlaError::not_found("filesystem", filesystem.id.to_string()))?;
            *slot = filesystem.clone();
        }
        self.publish();
        Ok(())
    }
}

// ============================================================================
// Assets
// ============================================================================

#[derive(Default)]
pub struct MockSource {
    manifests: Mutex<HashMap<(String, String), Vec<Asset>>>,
    pub unreachable: AtomicBool,
}

impl MockSource {
    pub fn publish(&self, asset_type: &str, arch: &str, assets: Vec<Asset>) {
        self.manifests
            .lock()
            .unwrap()
            .insert((asset_type.to_string(), arch.to_string()), assets);
    }
}

#[async_trait]
impl ManifestSource for MockSource {
    async fn fetch_manifest(
        &self,
        asset_type: &str,
        architecture: &str,
    ) -> std::result::Result<Vec<Asset>, ManifestError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ManifestError::Unreachable("offline".to_string()));
        }
        Ok(self
            .manifests
            .lock()
            .unwrap()
            .get(&(asset_type.to_string(), architecture.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MockCache {
    lists: Mutex<HashMap<(String, String), Vec<Asset>>>,
    timestamps: Mutex<HashMap<String, u64>>,
    present: Mutex<HashSet<String>>,
    versions: Mutex<HashMap<String, u64>>,
}

impl MockCache {
    pub fn mark_present(&self, asset: &Asset) {
        self.present.lock().unwrap().insert(asset.concatenated_name());
        self.timestamps
            .lock()
            .unwrap()
            .insert(asset.concatenated_name(), asset.remote_timestamp);
    }
}

#[async_trait]
impl AssetCache for MockCache {
    async fn cached_asset_list(&self, asset_type: &str, architecture: &str) -> Result<Vec<Asset>> {
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get(&(asset_type.to_string(), architecture.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn store_asset_list(
        &self,
        asset_type: &str,
        architecture: &str,
        assets: &[Asset],
    ) -> Result<()> {
        self.lists.lock().unwrap().insert(
            (asset_type.to_string(), architecture.to_string()),
            assets.to_vec(),
        );
        Ok(())
    }

    async fn local_timestamp(&self, asset: &Asset) -> Result<Option<u64>> {
        Ok(self
            .timestamps
            .lock()
            .unwrap()
            .get(&asset.concatenated_name())
            .copied())
    }

    async fn set_local_timestamp(&self, asset: &Asset, timestamp: u64) -> Result<()> {
        self.timestamps
            .lock()
            .unwrap()
            .insert(asset.concatenated_name(), timestamp);
        Ok(())
    }

    async fn is_present_locally(&self, asset: &Asset) -> bool {
        self.present
            .lock()
            .unwrap()
            .contains(&asset.concatenated_name())
    }

    async fn latest_version(&self, asset_type: &str) -> Result<u64> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .get(asset_type)
            .copied()
            .unwrap_or(0))
    }

    async fn set_latest_version(&self, asset_type: &str, version: u64) -> Result<()> {
        self.versions
            .lock()
            .unwrap()
            .insert(asset_type.to_string(), version);
        Ok(())
    }
}

// ============================================================================
// Downloads
// ============================================================================

pub struct MockCoordinator {
    next_id: AtomicU64,
    owned: Mutex<HashSet<DownloadId>>,
    /// Verdicts returned for owned completions, in order; `AllSucceeded` once empty
    pub completions: Mutex<VecDeque<DownloadCompletion>>,
    pub enqueued: Mutex<Vec<Vec<DownloadRequirement>>>,
    pub enqueue_error: Mutex<Option<UlaError>>,
    pub persisted: AtomicBool,
    pub recovery: Mutex<DownloadCompletion>,
    pub recoveries: AtomicUsize,
    pub stage_error: Mutex<Option<UlaError>>,
    pub stagings: AtomicUsize,
}

impl Default for MockCoordinator {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(100),
            owned: Mutex::new(HashSet::new()),
            completions: Mutex::new(VecDeque::new()),
            enqueued: Mutex::new(Vec::new()),
            enqueue_error: Mutex::new(None),
            persisted: AtomicBool::new(false),
            recovery: Mutex::new(DownloadCompletion::CacheEmpty),
            recoveries: AtomicUsize::new(0),
            stage_error: Mutex::new(None),
            stagings: AtomicUsize::new(0),
        }
    }
}

impl MockCoordinator {
    pub fn own(&self, id: DownloadId) {
        self.owned.lock().unwrap().insert(id);
    }

    pub fn script(&self, completion: DownloadCompletion) {
        self.completions.lock().unwrap().push_back(completion);
    }
}

#[async_trait]
impl DownloadCoordinator for MockCoordinator {
    async fn enqueue(&self, requirements: Vec<DownloadRequirement>) -> Result<Vec<DownloadId>> {
        if let Some(err) = self.enqueue_error.lock().unwrap().clone() {
            return Err(err);
        }
        let ids: Vec<DownloadId> = requirements
            .iter()
            .map(|_| DownloadId(self.next_id.fetch_add(1, Ordering::SeqCst)))
            .collect();
        self.owned.lock().unwrap().extend(ids.iter().copied());
        self.enqueued.lock().unwrap().push(requirements);
        Ok(ids)
    }

    fn is_owned_download(&self, id: DownloadId) -> bool {
        self.owned.lock().unwrap().contains(&id)
    }

    async fn handle_completion(&self, id: DownloadId) -> DownloadCompletion {
        if !self.is_owned_download(id) {
            return DownloadCompletion::NotOurs;
        }
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DownloadCompletion::AllSucceeded)
    }

    async fn has_persisted_state(&self) -> bool {
        self.persisted.load(Ordering::SeqCst)
    }

    async fn recover_persisted_state(&self) -> DownloadCompletion {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        self.recovery.lock().unwrap().clone()
    }

    async fn stage_completed_downloads(&self) -> Result<()> {
        self.stagings.fetch_add(1, Ordering::SeqCst);
        match self.stage_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Provisioning
// ============================================================================

pub struct MockExtractor {
    pub extracted: AtomicBool,
    /// Whether a successful extraction leaves the marker behind
    pub marks_extracted: AtomicBool,
    pub outcome: Mutex<Result<ExtractionOutcome>>,
    pub lines: Vec<String>,
    pub archive_removals: AtomicUsize,
    pub copies: AtomicUsize,
    pub copy_error: Mutex<Option<UlaError>>,
    pub support_cache_complete: AtomicBool,
    pub filesystem_assets_present: AtomicBool,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self {
            extracted: AtomicBool::new(false),
            marks_extracted: AtomicBool::new(true),
            outcome: Mutex::new(Ok(ExtractionOutcome::Success)),
            lines: vec!["rootfs/bin".to_string(), "rootfs/etc".to_string()],
            archive_removals: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
            copy_error: Mutex::new(None),
            support_cache_complete: AtomicBool::new(true),
            filesystem_assets_present: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl FilesystemExtractor for MockExtractor {
    async fn has_been_extracted(&self, _directory_name: &str) -> bool {
        self.extracted.load(Ordering::SeqCst)
    }

    async fn extract(
        &self,
        _filesystem: &Filesystem,
        on_line: &(dyn Fn(String) + Send + Sync),
    ) -> Result<ExtractionOutcome> {
        for line in &self.lines {
            on_line(line.clone());
        }
        let outcome = self.outcome.lock().unwrap().clone();
        if matches!(outcome, Ok(ExtractionOutcome::Success)) && self.marks_extracted.load(Ordering::SeqCst) {
            self.extracted.store(true, Ordering::SeqCst);
        }
        outcome
    }

    async fn remove_archive_files(&self, _directory_name: &str) -> Result<()> {
        self.archive_removals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn copy_assets_onto_filesystem(&self, _filesystem: &Filesystem) -> Result<()> {
        if let Some(err) = self.copy_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.filesystem_assets_present.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn assets_present_in_support_cache(&self, _assets: &[Asset]) -> bool {
        self.support_cache_complete.load(Ordering::SeqCst)
    }

    async fn assets_present_on_filesystem(&self, _directory_name: &str, _assets: &[Asset]) -> bool {
        self.filesystem_assets_present.load(Ordering::SeqCst)
    }
}

pub struct MockStorage {
    pub available: Mutex<Result<u64>>,
}

impl MockStorage {
    pub fn with(available_mb: u64) -> Self {
        Self {
            available: Mutex::new(Ok(available_mb)),
        }
    }

    pub fn set(&self, available: Result<u64>) {
        *self.available.lock().unwrap() = available;
    }
}

#[async_trait]
impl StorageProbe for MockStorage {
    async fn available_storage_mb(&self) -> Result<u64> {
        self.available.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct MockScriptInstaller {
    pub fail: AtomicBool,
    pub copied: Mutex<Vec<(String, i64)>>,
}

#[async_trait]
impl AppScriptInstaller for MockScriptInstaller {
    async fn copy_app_script(&self, app_name: &str, filesystem: &Filesystem) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(UlaError::io(format!("{}.sh not found", app_name)));
        }
        self.copied
            .lock()
            .unwrap()
            .push((app_name.to_string(), filesystem.id));
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn support_asset() -> Asset {
    Asset::new("busybox", "support", "arm64", 200)
}

pub fn distribution_script() -> Asset {
    Asset::new("startSSHServer.sh", "debian", "all", 300)
}

pub fn rootfs_asset() -> Asset {
    Asset::new("rootfs.tar.gz", "debian", "arm64", 300)
}

/// Publishes one asset per manifest for a debian/arm64 filesystem.
pub fn publish_debian_manifests(source: &MockSource) {
    source.publish("support", "all", vec![Asset::new("proot", "support", "all", 200)]);
    source.publish("support", "arm64", vec![support_asset()]);
    source.publish("debian", "all", vec![distribution_script()]);
    source.publish("debian", "arm64", vec![rootfs_asset()]);
}

pub fn resolver(source: &Arc<MockSource>, cache: &Arc<MockCache>) -> Arc<AssetResolver> {
    Arc::new(AssetResolver::new(source.clone(), cache.clone()))
}
