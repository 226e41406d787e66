//! Application layer for ula.
//!
//! Hosts the two provisioning state machines, the runner that serializes their
//! events, and the coordinator that chains them together.

pub mod apps_startup;
pub mod coordinator;
pub mod machine;
pub mod session_startup;

#[cfg(test)]
mod test_support;

pub use apps_startup::{AppsFilesystemDefaults, AppsStartupEvent, AppsStartupFsm, AppsStartupState};
pub use coordinator::{
    AppsStartupHandle, FilesystemCredentials, SessionStartupHandle, StartupCoordinator,
    StartupOutcome, StartupPrompter,
};
pub use machine::{FsmHandle, StateMachine};
pub use session_startup::{SessionStartupEvent, SessionStartupFsm, SessionStartupState};
