//! Concrete collaborators for the ula provisioning engine.

pub mod asset_downloader;
pub mod config;
pub mod filesystem_manager;
pub mod http_downloader;
pub mod http_manifest_source;
pub mod paths;
pub mod storage;
pub mod storage_probe;
pub mod toml_asset_cache;
pub mod toml_store;

pub use asset_downloader::AssetDownloader;
pub use config::ProvisionConfig;
pub use filesystem_manager::LocalFilesystemManager;
pub use http_downloader::{DownloadBackend, DownloadStatus, HttpDownloader};
pub use http_manifest_source::HttpManifestSource;
pub use paths::UlaPaths;
pub use storage_probe::DiskStorageProbe;
pub use toml_asset_cache::TomlAssetCache;
pub use toml_store::TomlStore;
