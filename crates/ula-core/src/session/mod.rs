//! Session domain module.
//!
//! # Module Structure
//!
//! - `model`: Session entity plus service type/location value types
//! - `repository`: Repository trait for session persistence

mod model;
mod repository;

// Re-export public API
pub use model::{SSH_PORT, ServiceLocation, ServiceType, Session, VNC_DISPLAY_PORT};
pub use repository::SessionRepository;
