//! Filesystem domain model.

use crate::session::ServiceLocation;
use serde::{Deserialize, Serialize};

/// A named root-filesystem installation of a Linux distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filesystem {
    /// Store-assigned identity; also names the filesystem's directory on disk
    pub id: i64,
    /// Display name, unique among user filesystems and among apps filesystems
    pub name: String,
    pub distribution_type: String,
    pub arch_type: String,
    #[serde(default)]
    pub location: ServiceLocation,
    #[serde(default)]
    pub default_username: String,
    #[serde(default)]
    pub default_password: String,
    #[serde(default)]
    pub default_vnc_password: String,
    /// Distribution asset version last copied onto this filesystem.
    #[serde(default)]
    pub version_code_used: u64,
    #[serde(default)]
    pub is_created_from_backup: bool,
    #[serde(default)]
    pub is_apps_filesystem: bool,
}

impl Filesystem {
    /// Creates a not-yet-persisted filesystem.
    pub fn new(
        name: impl Into<String>,
        distribution_type: impl Into<String>,
        arch_type: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            distribution_type: distribution_type.into(),
            arch_type: arch_type.into(),
            location: ServiceLocation::Local,
            default_username: String::new(),
            default_password: String::new(),
            default_vnc_password: String::new(),
            version_code_used: 0,
            is_created_from_backup: false,
            is_apps_filesystem: false,
        }
    }

    /// Name of the directory holding this filesystem's contents.
    pub fn directory_name(&self) -> String {
        self.id.to_string()
    }

    /// Credentials count as set only when all three are non-empty.
    pub fn credentials_are_set(&self) -> bool {
        !self.default_username.is_empty()
            && !self.default_password.is_empty()
            && !self.default_vnc_password.is_empty()
    }

    pub fn set_credentials(
        &mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        vnc_password: impl Into<String>,
    ) {
        self.default_username = username.into();
        self.default_password = password.into();
        self.default_vnc_password = vnc_password.into();
    }
}
