//! Session domain model.
//!
//! A session is a user-facing instance of a running Linux environment bound
//! to exactly one filesystem.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Port used for shell (SSH) access when no other port has been chosen.
pub const SSH_PORT: u16 = 2022;

/// VNC display number used for graphical sessions.
pub const VNC_DISPLAY_PORT: u16 = 51;

/// The remote-access protocol used to reach a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Ssh,
    Vnc,
    Xsdl,
    #[default]
    Unselected,
}

impl ServiceType {
    /// The port a session of this type listens on.
    pub fn default_port(&self) -> u16 {
        match self {
            ServiceType::Vnc => VNC_DISPLAY_PORT,
            _ => SSH_PORT,
        }
    }

    pub fn is_selected(&self) -> bool {
        !matches!(self, ServiceType::Unselected)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceType::Ssh => "ssh",
            ServiceType::Vnc => "vnc",
            ServiceType::Xsdl => "xsdl",
            ServiceType::Unselected => "unselected",
        };
        f.write_str(name)
    }
}

/// Where a session's environment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLocation {
    Local,
    Remote,
    #[default]
    Unselected,
}

impl ServiceLocation {
    pub fn is_selected(&self) -> bool {
        !matches!(self, ServiceLocation::Unselected)
    }
}

impl fmt::Display for ServiceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceLocation::Local => "local",
            ServiceLocation::Remote => "remote",
            ServiceLocation::Unselected => "unselected",
        };
        f.write_str(name)
    }
}

/// Represents a provisionable session.
///
/// Identity (`id`) is assigned by the store on insert; callers insert with
/// `id == 0` and re-query to learn the assigned value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    /// Display name, unique among user sessions and among apps sessions
    pub name: String,
    pub filesystem_id: i64,
    #[serde(default)]
    pub filesystem_name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub service_type: ServiceType,
    #[serde(default)]
    pub service_location: ServiceLocation,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub vnc_password: String,
    #[serde(default = "default_geometry")]
    pub geometry: String,
    #[serde(default)]
    pub is_apps_session: bool,
}

fn default_port() -> u16 {
    SSH_PORT
}

fn default_geometry() -> String {
    "1024x768".to_string()
}

impl Session {
    /// Creates a not-yet-persisted session bound to `filesystem_id`.
    pub fn new(name: impl Into<String>, filesystem_id: i64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            filesystem_id,
            filesystem_name: String::new(),
            active: false,
            service_type: ServiceType::Unselected,
            service_location: ServiceLocation::Unselected,
            port: default_port(),
            username: String::new(),
            password: String::new(),
            vnc_password: String::new(),
            geometry: default_geometry(),
            is_apps_session: false,
        }
    }

    /// Sets the service type and the port that goes with it.
    pub fn set_service_type(&mut self, service_type: ServiceType) {
        self.service_type = service_type;
        self.port = service_type.default_port();
    }
}
