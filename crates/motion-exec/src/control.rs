//! Cycle control state machine.
//!
//! One shared state word couples the command layer, the segment preparer
//! and the step executor: the preparer reads it between slicing
//! iterations, the executor between ticks. On a single-core target the
//! word lives behind the usual interrupt-shared discipline; the fields
//! here are plain because the owner arbitrates access.

use crate::error::CycleError;

/// Operating state of the motion controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MachineState {
    /// No motion queued or running.
    #[default]
    Idle,
    /// Blocks queued, waiting for cycle start.
    Queued,
    /// Executing the segment pipeline.
    Cycle,
    /// Feed hold: decelerating to a controlled stop, plan retained.
    Hold,
    /// Fault lockout. Motion is dead until reset.
    Alarm,
}

/// Asynchronous execution flags raised by the executor for the main
/// program to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecFlags(u8);

impl ExecFlags {
    /// The executor drained the segment ring and stopped the cycle.
    pub const CYCLE_STOP: u8 = 1 << 0;

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// The shared system state word.
#[derive(Debug, Default)]
pub struct SystemState {
    state: MachineState,
    exec: ExecFlags,
}

impl SystemState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Marks work queued. Only meaningful from idle; a running cycle
    /// absorbs new blocks without a state change.
    pub fn queue(&mut self) {
        if self.state == MachineState::Idle {
            self.state = MachineState::Queued;
        }
    }

    /// `Queued | Hold -> Cycle`. Starting an already-running cycle is a
    /// no-op.
    pub fn start_cycle(&mut self) -> Result<(), CycleError> {
        match self.state {
            MachineState::Queued | MachineState::Hold | MachineState::Cycle => {
                self.state = MachineState::Cycle;
                Ok(())
            }
            MachineState::Alarm => Err(CycleError::AlarmLock),
            MachineState::Idle => Err(CycleError::NotReady),
        }
    }

    /// `Cycle -> Hold`. Holding while already held is a no-op.
    pub fn hold(&mut self) -> Result<(), CycleError> {
        match self.state {
            MachineState::Cycle | MachineState::Hold => {
                self.state = MachineState::Hold;
                Ok(())
            }
            MachineState::Alarm => Err(CycleError::AlarmLock),
            _ => Err(CycleError::NotReady),
        }
    }

    /// Forces the alarm lockout from any state.
    pub fn alarm(&mut self) {
        self.state = MachineState::Alarm;
    }

    /// Clears any state (including alarm) back to idle.
    pub fn reset(&mut self) {
        self.state = MachineState::Idle;
        self.exec = ExecFlags::default();
    }

    pub(crate) fn set_state(&mut self, state: MachineState) {
        self.state = state;
    }

    pub fn exec_flags(&self) -> ExecFlags {
        self.exec
    }

    pub fn set_exec_flag(&mut self, flag: u8) {
        self.exec.set(flag);
    }

    pub fn clear_exec_flag(&mut self, flag: u8) {
        self.exec.clear(flag);
    }
}
