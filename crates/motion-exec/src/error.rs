//! Error types for the motion execution core.

/// Errors reported by the cycle state machine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CycleError {
    /// The requested transition is not legal from the current state.
    NotReady,
    /// The controller is alarm-locked and must be reset first.
    AlarmLock,
}

impl core::fmt::Display for CycleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotReady => write!(f, "transition not legal from the current state"),
            Self::AlarmLock => write!(f, "controller is alarm-locked"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CycleError {}
