//! Session provisioning flow.
//!
//! # Module Structure
//!
//! - `state`: Closed set of protocol positions
//! - `event`: Inputs accepted by the machine
//! - `fsm`: Guards and handlers (`SessionStartupFsm`)

mod event;
mod fsm;
mod state;

pub use event::SessionStartupEvent;
pub use fsm::{INSUFFICIENT_STORAGE_MB, LOW_STORAGE_MB, SessionStartupFsm};
pub use state::SessionStartupState;
