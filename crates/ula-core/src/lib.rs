//! Domain layer of the ula provisioning engine.
//!
//! Holds the models persisted by the store, the traits every collaborator is
//! consumed through, and the [`asset::AssetResolver`] domain service.

pub mod app;
pub mod asset;
pub mod download;
pub mod error;
pub mod filesystem;
pub mod provision;
pub mod session;

// Re-export common error type
pub use error::{Result, UlaError};
