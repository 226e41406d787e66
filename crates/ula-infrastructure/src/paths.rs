//! Path management for ula.
//!
//! Configuration lives in the platform config directory. Everything else sits
//! under a single files directory chosen by the configuration:
//!
//! ```text
//! ~/.config/ula/
//! └── config.toml              # ProvisionConfig
//!
//! <files>/                     # default ~/.local/share/ula
//! ├── store.toml               # sessions and filesystems
//! ├── asset_cache.toml         # cached manifests, timestamps, versions
//! ├── downloads.toml           # in-flight download book-keeping
//! ├── download_jobs.toml       # jobs of the HTTP downloader
//! ├── downloads/               # files being downloaded
//! ├── support/                 # support assets
//! ├── <distribution>/          # distribution assets and rootfs archive
//! ├── <filesystem id>/         # extracted filesystems
//! │   └── support/
//! ├── apps/<app>/<app>.sh      # app launch scripts
//! └── logs/
//! ```

use std::path::{Path, PathBuf};
use ula_core::asset::Asset;
use ula_core::error::{Result, UlaError};

const APP_DIR: &str = "ula";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UlaPaths {
    files_dir: PathBuf,
}

impl UlaPaths {
    pub fn new(files_dir: impl Into<PathBuf>) -> Self {
        Self {
            files_dir: files_dir.into(),
        }
    }

    /// `~/.config/ula` or the platform equivalent.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| UlaError::config("Cannot find config directory"))
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// `~/.local/share/ula` or the platform equivalent.
    pub fn default_files_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| UlaError::config("Cannot find data directory"))
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    pub fn store_file(&self) -> PathBuf {
        self.files_dir.join("store.toml")
    }

    pub fn asset_cache_file(&self) -> PathBuf {
        self.files_dir.join("asset_cache.toml")
    }

    pub fn downloads_file(&self) -> PathBuf {
        self.files_dir.join("downloads.toml")
    }

    pub fn download_jobs_file(&self) -> PathBuf {
        self.files_dir.join("download_jobs.toml")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.files_dir.join("downloads")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.files_dir.join("logs")
    }

    /// Directory holding the assets of one asset type (`support` or a distribution).
    pub fn asset_type_dir(&self, asset_type: &str) -> PathBuf {
        self.files_dir.join(asset_type)
    }

    /// Local copy of an asset in the support cache.
    pub fn asset_file(&self, asset: &Asset) -> PathBuf {
        self.files_dir.join(asset.path_name())
    }

    pub fn filesystem_dir(&self, directory_name: &str) -> PathBuf {
        self.files_dir.join(directory_name)
    }

    pub fn filesystem_support_dir(&self, directory_name: &str) -> PathBuf {
        self.filesystem_dir(directory_name).join("support")
    }

    pub fn app_script(&self, app_name: &str) -> PathBuf {
        self.files_dir
            .join("apps")
            .join(app_name)
            .join(format!("{}.sh", app_name))
    }
}
