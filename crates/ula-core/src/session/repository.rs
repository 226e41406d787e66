//! Session repository trait.
//!
//! Defines the interface for session persistence operations.

use super::model::Session;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::watch;

/// An abstract repository for managing session persistence.
///
/// Identity is assigned by the store. Inserts abort on duplicates (returning
/// `UlaError::Conflict`), updates replace the stored row.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Subscribes to snapshots of every stored session.
    ///
    /// The receiver holds the current snapshot immediately.
    fn watch_all(&self) -> watch::Receiver<Vec<Session>>;

    /// Subscribes to snapshots of the currently active sessions.
    fn watch_active(&self) -> watch::Receiver<Vec<Session>>;

    /// Lists all stored sessions.
    async fn list_all(&self) -> Result<Vec<Session>>;

    /// Finds the managed-app session for the given app name.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Session))`: Session found
    /// - `Ok(None)`: No apps session with that name
    /// - `Err(_)`: Error occurred during retrieval
    async fn find_apps_session(&self, app_name: &str) -> Result<Option<Session>>;

    /// Lists sessions flagged as active.
    async fn find_active_sessions(&self) -> Result<Vec<Session>>;

    /// Inserts a new session. The `id` field of the argument is ignored.
    ///
    /// Fails with `UlaError::Conflict` when a session with the same name exists.
    async fn insert(&self, session: &Session) -> Result<()>;

    /// Replaces the stored session with the same id.
    async fn update(&self, session: &Session) -> Result<()>;
}
