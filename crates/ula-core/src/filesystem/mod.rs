//! Filesystem domain module.

mod model;
mod repository;

pub use model::Filesystem;
pub use repository::FilesystemRepository;
