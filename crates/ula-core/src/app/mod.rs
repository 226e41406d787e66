//! Managed application domain model.

use serde::{Deserialize, Serialize};

use crate::session::ServiceType;

/// A predefined program whose session and filesystem are provisioned
/// automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    /// Unique app name; also the name of its dedicated session
    pub name: String,
    #[serde(default)]
    pub category: String,
    /// Distribution type the app's filesystem must run
    pub filesystem_required: String,
    #[serde(default)]
    pub supports_cli: bool,
    #[serde(default)]
    pub supports_gui: bool,
    #[serde(default)]
    pub is_paid_app: bool,
    #[serde(default)]
    pub version: u64,
}

impl App {
    pub fn new(name: impl Into<String>, filesystem_required: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: String::new(),
            filesystem_required: filesystem_required.into(),
            supports_cli: false,
            supports_gui: false,
            is_paid_app: false,
            version: 0,
        }
    }

    /// The only service type this app can use, if its support is one-sided.
    ///
    /// Apps supporting both (or neither) interface need an explicit choice.
    pub fn implied_service_type(&self) -> Option<ServiceType> {
        match (self.supports_cli, self.supports_gui) {
            (true, false) => Some(ServiceType::Ssh),
            (false, true) => Some(ServiceType::Vnc),
            _ => None,
        }
    }
}
