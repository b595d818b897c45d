//! # Motion Core Simulation Harness
//!
//! Runs the motion execution core against virtual hardware on the host:
//! a fake planner queue, a virtual step port with a recorded pulse log,
//! and a tick loop standing in for the step interrupt. Used by the
//! scenario tests and the demo binary to validate profiles, step
//! counts, and timing without a machine attached.

pub mod error;
pub mod hal;
pub mod machine;
pub mod planner;
pub mod trace;

pub use error::SimError;
pub use hal::{PulseRecord, VirtualHal};
pub use machine::Machine;
pub use planner::BlockQueue;
pub use trace::MotionTrace;
