//! Harness error types.

use motion_exec::CycleError;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// The fake planner ring is out of block slots.
    #[error("planner queue is full")]
    QueueFull,
    /// The cycle controller rejected the command.
    #[error("cycle control: {0}")]
    Cycle(#[from] CycleError),
    /// The run exceeded its tick budget without going idle.
    #[error("simulation did not settle within {0} ticks")]
    Timeout(u64),
}
