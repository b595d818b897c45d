//! Recording mock backend for tests and host simulation.

use crate::{PulseTimer, StepOutput, StepTimer};

/// In-memory [`StepperHal`](crate::StepperHal) that records everything
/// written to it.
#[derive(Debug, Default)]
pub struct RecordingHal {
    /// Last full port word written.
    pub port: u8,
    /// Last direction-only write.
    pub dir_port: u8,
    /// Every port word written, in order.
    pub port_writes: Vec<u8>,
    pub enabled: bool,
    pub running: bool,
    /// Width of the currently armed pulse, if any.
    pub armed_pulse: Option<u8>,
    /// Total milliseconds spent in `delay_ms`.
    pub dwelled_ms: u32,
}

impl RecordingHal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepOutput for RecordingHal {
    fn set_step_port(&mut self, bits: u8) {
        self.port = bits;
        self.port_writes.push(bits);
    }

    fn set_direction_port(&mut self, bits: u8) {
        self.dir_port = bits;
    }

    fn enable_steppers(&mut self, enable: bool) {
        self.enabled = enable;
    }
}

impl PulseTimer for RecordingHal {
    fn arm_pulse(&mut self, width_us: u8) {
        self.armed_pulse = Some(width_us);
    }
}

impl StepTimer for RecordingHal {
    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn delay_ms(&mut self, ms: u16) {
        self.dwelled_ms += u32::from(ms);
    }
}
