//! # Motion Execution Core
//!
//! The real-time half of a CNC controller: consumes planned linear motion
//! blocks and turns them into precisely timed step-and-direction pulses
//! along trapezoidal velocity profiles.
//!
//! Two cooperating tiers connected by a lock-free ring:
//! - [`prep::SegmentPreparer`] runs in the main loop, slicing each
//!   block's velocity profile into fixed-time segments.
//! - [`stepper::StepExecutor`] runs from the periodic step interrupt,
//!   draining segments through a dual-Bresenham kernel (inverse-time
//!   counter for *when* to step, per-axis counters for *which* axes).
//!
//! The [`segment::SegmentRing`] between them is single-producer /
//! single-consumer and statically sized; nothing allocates in the steady
//! state. Hardware access goes through the capability traits of the
//! `step-port` crate.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod config;
pub mod control;
pub mod error;
pub mod planner;
pub mod prep;
pub mod segment;
pub mod stepper;

// Re-export core types for easier access
pub use config::StepperConfig;
pub use control::{ExecFlags, MachineState, SystemState};
pub use error::CycleError;
pub use planner::{BlockIndex, PlannerBlock, PlannerQueue};
pub use prep::{PartialUpdate, PrepState, SegmentPreparer};
pub use segment::{Segment, SegmentConsumer, SegmentProducer, SegmentRing, DATA_CAP, SEG_CAP};
pub use step_port::N_AXIS;
pub use stepper::StepExecutor;

/// Step timer frequency, in ticks per second.
pub const ISR_RATE: u32 = 30_000;

/// Granularity of the velocity profile slicing.
pub const ACCEL_TICKS_PER_SEC: u32 = 100;

/// Nominal duration of one prepared segment, in seconds.
pub const DT_SEGMENT: f32 = ACCEL_TICKS_PER_SEC as f32 / ISR_RATE as f32;

/// Integer scaling factor for the inverse-time counter. Chosen so that
/// `dist_per_step` fits comfortably in 32 bits at practical steps/mm
/// resolutions while single-tick decrements stay integer-accurate at the
/// lowest usable step rates.
pub const INV_TIME_MULTIPLIER: f32 = (1u32 << 28) as f32;
