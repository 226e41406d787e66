//! TOML-backed store for sessions and filesystems.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::watch;

use crate::storage::AtomicTomlFile;
use ula_core::error::{Result, UlaError};
use ula_core::filesystem::{Filesystem, FilesystemRepository};
use ula_core::session::{ServiceLocation, Session, SessionRepository};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    next_id: i64,
    #[serde(default)]
    filesystems: Vec<Filesystem>,
    #[serde(default)]
    sessions: Vec<Session>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            next_id: 1,
            filesystems: Vec::new(),
            sessions: Vec::new(),
        }
    }
}

impl StoreDocument {
    fn take_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Sessions and filesystems kept in one TOML document.
///
/// Ids are assigned on insert, names are unique per table. Every committed
/// change is pushed to the watch channels, so observers always see the last
/// written snapshot.
pub struct TomlStore {
    file: AtomicTomlFile<StoreDocument>,
    document: Mutex<StoreDocument>,
    sessions_tx: watch::Sender<Vec<Session>>,
    active_tx: watch::Sender<Vec<Session>>,
    filesystems_tx: watch::Sender<Vec<Filesystem>>,
}

impl TomlStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = AtomicTomlFile::new(path.as_ref());
        let document: StoreDocument = file.load_or_default()?;
        tracing::debug!(
            path = %path.as_ref().display(),
            sessions = document.sessions.len(),
            filesystems = document.filesystems.len(),
            "Opened store"
        );

        let store = Self {
            file,
            document: Mutex::new(document.clone()),
            sessions_tx: watch::channel(Vec::new()).0,
            active_tx: watch::channel(Vec::new()).0,
            filesystems_tx: watch::channel(Vec::new()).0,
        };
        store.publish(&document);
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreDocument>> {
        self.document
            .lock()
            .map_err(|_| UlaError::internal("store lock poisoned"))
    }

    fn publish(&self, document: &StoreDocument) {
        let active = document
            .sessions
            .iter()
            .filter(|session| session.active)
            .cloned()
            .collect();
        self.sessions_tx.send_replace(document.sessions.clone());
        self.active_tx.send_replace(active);
        self.filesystems_tx.send_replace(document.filesystems.clone());
    }

    /// Applies `change` to a copy of the document, persists it, then swaps it in.
    fn commit<R>(&self, change: impl FnOnce(&mut StoreDocument) -> Result<R>) -> Result<R> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let result = change(&mut next)?;
        self.file.save(&next)?;
        self.publish(&next);
        *guard = next;
        Ok(result)
    }
}

#[async_trait]
impl SessionRepository for TomlStore {
    fn watch_all(&self) -> watch::Receiver<Vec<Session>> {
        self.sessions_tx.subscribe()
    }

    fn watch_active(&self) -> watch::Receiver<Vec<Session>> {
        self.active_tx.subscribe()
    }

    async fn list_all(&self) -> Result<Vec<Session>> {
        Ok(self.lock()?.sessions.clone())
    }

    async fn find_apps_session(&self, app_name: &str) -> Result<Option<Session>> {
        Ok(self
            .lock()?
            .sessions
            .iter()
            .find(|session| session.is_apps_session && session.name == app_name)
            .cloned())
    }

    async fn find_active_sessions(&self) -> Result<Vec<Session>> {
        Ok(self
            .lock()?
            .sessions
            .iter()
            .filter(|session| session.active)
            .cloned()
            .collect())
    }

    async fn insert(&self, session: &Session) -> Result<()> {
        let id = self.commit(|document| {
            // Apps sessions and user sessions have separate name spaces.
            let taken = document.sessions.iter().any(|s| {
                s.name == session.name && s.is_apps_session == session.is_apps_session
            });
            if taken {
                return Err(UlaError::conflict("session", session.name.clone()));
            }
            let mut session = session.clone();
            session.id = document.take_id();
            let id = session.id;
            document.sessions.push(session);
            Ok(id)
        })?;
        tracing::info!(session = %session.name, id, "Inserted session");
        Ok(())
    }

    async fn update(&self, session: &Session) -> Result<()> {
        self.commit(|document| {
            let slot = document
                .sessions
                .iter_mut()
                .find(|s| s.id == session.id)
                .ok_or_else(|| UlaError::not_found("session", session.id.to_string()))?;
            *slot = session.clone();
            Ok(())
        })
    }
}

#[async_trait]
impl FilesystemRepository for TomlStore {
    fn watch_all(&self) -> watch::Receiver<Vec<Filesystem>> {
        self.filesystems_tx.subscribe()
    }

    async fn list_all(&self) -> Result<Vec<Filesystem>> {
        Ok(self.lock()?.filesystems.clone())
    }

    async fn find_apps_filesystem(
        &self,
        distribution_type: &str,
        location: ServiceLocation,
    ) -> Result<Option<Filesystem>> {
        Ok(self
            .lock()?
            .filesystems
            .iter()
            .find(|filesystem| {
                filesystem.is_apps_filesystem
                    && filesystem.distribution_type == distribution_type
                    && filesystem.location == location
            })
            .cloned())
    }

    async fn insert(&self, filesystem: &Filesystem) -> Result<()> {
        let id = self.commit(|document| {
            let taken = document.filesystems.iter().any(|f| {
                f.name == filesystem.name && f.is_apps_filesystem == filesystem.is_apps_filesystem
            });
            if taken {
                return Err(UlaError::conflict("filesystem", filesystem.name.clone()));
            }
            let mut filesystem = filesystem.clone();
            filesystem.id = document.take_id();
            let id = filesystem.id;
            document.filesystems.push(filesystem);
            Ok(id)
        })?;
        tracing::info!(filesystem = %filesystem.name, id, "Inserted filesystem");
        Ok(())
    }

    async fn update(&self, filesystem: &Filesystem) -> Result<()> {
        self.commit(|document| {
            let slot = document
                .filesystems
                .iter_mut()
                .find(|f| f.id == filesystem.id)
                .ok_or_else(|| UlaError::not_found("filesystem", filesystem.id.to_string()))?;
            *slot = filesystem.clone();
            Ok(())
        })
    }
}
