//! Planner-facing contract.
//!
//! The upstream planner owns a ring of motion blocks and may recompute
//! any block the execution side has not checked out. The execution core
//! never holds references into that ring; it addresses blocks by index
//! and copies them out at checkout, which keeps the pipeline boundary
//! free of lifetime entanglement.

use step_port::N_AXIS;

/// Index of a block within the upstream planner ring.
pub type BlockIndex = u8;

/// One planned linear multi-axis move.
///
/// Immutable once checked out for execution; the planner may recompute
/// speeds of blocks still ahead of the preparer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlannerBlock {
    /// Per-axis step counts (unsigned; sign lives in `direction_bits`).
    pub steps: [u32; N_AXIS],
    /// Total step events: the maximum of the per-axis counts.
    pub step_event_count: u32,
    /// One bit per axis; a set bit means the axis moves negative.
    pub direction_bits: u8,
    /// Euclidean path length in millimeters.
    pub millimeters: f32,
    /// Squared entry speed, (mm/s)^2.
    pub entry_speed_sqr: f32,
    /// Squared nominal (programmed) speed, (mm/s)^2.
    pub nominal_speed_sqr: f32,
    /// Acceleration along the path, mm/s^2.
    pub acceleration: f32,
}

impl PlannerBlock {
    /// Builds a block from per-axis steps, deriving `step_event_count`.
    pub fn new(
        steps: [u32; N_AXIS],
        direction_bits: u8,
        millimeters: f32,
        entry_speed_sqr: f32,
        nominal_speed_sqr: f32,
        acceleration: f32,
    ) -> Self {
        let step_event_count = steps[0].max(steps[1]).max(steps[2]);
        Self {
            steps,
            step_event_count,
            direction_bits,
            millimeters,
            entry_speed_sqr,
            nominal_speed_sqr,
            acceleration,
        }
    }
}

/// Read/checkout interface onto the upstream planner ring.
///
/// The preparer walks the ring by index; the executor checks blocks out
/// at the head and discards them once every step has been emitted.
pub trait PlannerQueue {
    /// Block at `index`, if one is queued there.
    fn block(&self, index: BlockIndex) -> Option<PlannerBlock>;

    /// Ring successor of `index`.
    fn next_index(&self, index: BlockIndex) -> BlockIndex;

    /// The block currently at the head of the ring (the one being
    /// executed), if any.
    fn current_block(&self) -> Option<PlannerBlock>;

    /// Drops the head block after its last step event has been emitted.
    fn discard_current_block(&mut self);
}
