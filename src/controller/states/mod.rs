//! The five lifecycle states.

mod action;
mod error;
mod idle;
mod setup;
mod update;

pub use action::{ActionState, DeviceRequest};
pub use error::{ErrorState, FaultRecord};
pub use idle::IdleState;
pub use setup::{SetupPhase, SetupState};
pub use update::{UpdatePhase, UpdateState};
