//! Managed application flow: resolves the app's dedicated filesystem and
//! session, gathers the missing settings and stages the app's launch script.

mod event;
mod fsm;
mod state;

pub use event::AppsStartupEvent;
pub use fsm::{AppsFilesystemDefaults, AppsStartupFsm};
pub use state::AppsStartupState;
