//! Provisioning configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::paths::UlaPaths;
use crate::storage::AtomicTomlFile;
use ula_core::error::Result;

/// Directory of a published asset set. `{repo}` is the capitalized asset type,
/// `{arch}` the architecture.
pub const DEFAULT_ASSET_BASE_URL: &str =
    "https://github.com/CypherpunkArmory/UserLAnd-Assets-{repo}/raw/master/assets/{arch}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub files_dir: PathBuf,
    /// Template of the directory holding `assets.txt`
    pub manifest_base_url: String,
    /// Template of the directory holding the asset files
    pub download_base_url: String,
    pub architecture: String,
    /// Credentials given to new apps filesystems. Empty ones are asked for.
    pub default_username: String,
    pub default_password: String,
    pub default_vnc_password: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            files_dir: UlaPaths::default_files_dir().unwrap_or_else(|_| PathBuf::from(".ula")),
            manifest_base_url: DEFAULT_ASSET_BASE_URL.to_string(),
            download_base_url: DEFAULT_ASSET_BASE_URL.to_string(),
            architecture: host_architecture().to_string(),
            default_username: String::new(),
            default_password: String::new(),
            default_vnc_password: String::new(),
        }
    }
}

impl ProvisionConfig {
    /// Loads the configuration at `path`, writing the defaults when it is missing.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let file = AtomicTomlFile::<ProvisionConfig>::new(path);
        if let Some(config) = file.load()? {
            tracing::debug!(path = %path.display(), "Loaded provisioning config");
            return Ok(config);
        }

        let config = ProvisionConfig::default();
        file.save(&config)?;
        tracing::info!(path = %path.display(), "Wrote default provisioning config");
        Ok(config)
    }

    /// Loads from the default location (`~/.config/ula/config.toml`).
    pub fn load_default() -> Result<Self> {
        Self::load_or_create(&UlaPaths::config_file()?)
    }

    pub fn paths(&self) -> UlaPaths {
        UlaPaths::new(self.files_dir.clone())
    }
}

/// Maps the compiled target architecture onto the names used by the asset repos.
pub fn host_architecture() -> &'static str {
    map_architecture(std::env::consts::ARCH)
}

fn map_architecture(arch: &str) -> &str {
    match arch {
        "aarch64" => "arm64",
        "arm" => "arm",
        "x86" => "x86",
        "x86_64" => "x86_64",
        other => other,
    }
}

/// Fills `{repo}` and `{arch}` into an asset URL template.
pub fn render_asset_url(template: &str, asset_type: &str, architecture: &str) -> String {
    let mut repo = asset_type.to_string();
    if let Some(first) = repo.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    template
        .replace("{repo}", &repo)
        .replace("{arch}", architecture)
}
