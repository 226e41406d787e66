//! Download domain module.

mod coordinator;
mod model;

pub use coordinator::DownloadCoordinator;
pub use model::{DownloadCompletion, DownloadId, DownloadRequirement};
