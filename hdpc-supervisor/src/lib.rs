//! Supervisory state machine for the HDPC motor controller fleet
//!
//! The [`Supervisor`] sequences every device through a shared lifecycle: initialize, home, wait
//! stopped, enable, drive, disable. It is advanced by [`Event::Execute`] once per bus tick, and
//! an [`Event::EmergencyStop`] forces it into `Fault` from any state.
#![warn(missing_docs, missing_copy_implementations)]

mod drive_unit;
mod supervisor;

pub use drive_unit::DriveUnit;
pub use supervisor::{
    DriveMode, Event, EventResult, StateId, StateInfo, Supervisor, SupervisorError,
};
