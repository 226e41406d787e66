//! Download coordinator trait.

use async_trait::async_trait;

use super::model::{DownloadCompletion, DownloadId, DownloadRequirement};
use crate::error::Result;

/// Issues batches of downloads and keeps the book-keeping needed to judge
/// completion signals, including across process restarts.
#[async_trait]
pub trait DownloadCoordinator: Send + Sync {
    /// Hands a batch of requirements to the download subsystem.
    async fn enqueue(&self, requirements: Vec<DownloadRequirement>) -> Result<Vec<DownloadId>>;

    /// Whether `id` belongs to a download this coordinator issued.
    ///
    /// Must not block: state machines call it from their transition guards.
    fn is_owned_download(&self, id: DownloadId) -> bool;

    /// Records a completion signal and reports the overall progress.
    async fn handle_completion(&self, id: DownloadId) -> DownloadCompletion;

    /// Whether an in-flight batch was persisted by an earlier process.
    async fn has_persisted_state(&self) -> bool;

    /// Rebuilds the in-flight set from persisted state and replays the
    /// completions that happened while the process was gone.
    async fn recover_persisted_state(&self) -> DownloadCompletion;

    /// Copies completed downloads into the local support cache.
    ///
    /// All-or-nothing from the caller's point of view.
    async fn stage_completed_downloads(&self) -> Result<()>;
}
