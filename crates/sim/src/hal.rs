//! Virtual stepper hardware.
//!
//! Implements the `step-port` capability traits over plain state plus a
//! pulse log: every rising edge with active step lines is recorded with
//! the virtual tick it happened on, decoded back through the configured
//! invert masks.

use motion_exec::StepperConfig;
use step_port::{PulseTimer, StepOutput, StepTimer, DIRECTION_MASK, DIR_SHIFT, STEP_MASK};

/// One recorded step pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct PulseRecord {
    /// Virtual tick of the rising edge.
    pub tick: u64,
    /// Axis step bits, polarity removed (bit 0 = X).
    pub step_bits: u8,
    /// Axis direction bits, polarity removed (bit 0 = X, set = negative).
    pub direction_bits: u8,
}

/// Virtual port, timers, and clock.
#[derive(Debug)]
pub struct VirtualHal {
    cfg: StepperConfig,
    /// Virtual time in step-timer ticks.
    pub now: u64,
    pub port: u8,
    pub steppers_enabled: bool,
    pub timer_running: bool,
    /// Pulse width armed on the one-shot, if pending.
    pub armed_pulse: Option<u8>,
    /// Milliseconds spent in idle-lock dwells.
    pub dwelled_ms: u32,
    pub pulses: Vec<PulseRecord>,
}

impl VirtualHal {
    pub fn new(cfg: StepperConfig) -> Self {
        Self {
            cfg,
            now: 0,
            port: cfg.invert_mask(),
            steppers_enabled: false,
            timer_running: false,
            armed_pulse: None,
            dwelled_ms: 0,
            pulses: Vec::new(),
        }
    }

    /// Per-axis pulse totals over the whole log.
    pub fn pulses_per_axis(&self) -> [u32; 3] {
        let mut totals = [0u32; 3];
        for pulse in &self.pulses {
            for (axis, total) in totals.iter_mut().enumerate() {
                if pulse.step_bits & (1 << axis) != 0 {
                    *total += 1;
                }
            }
        }
        totals
    }
}

impl StepOutput for VirtualHal {
    fn set_step_port(&mut self, bits: u8) {
        self.port = bits;
        let raw = bits ^ self.cfg.invert_mask();
        let step_bits = raw & STEP_MASK;
        if step_bits != 0 {
            self.pulses.push(PulseRecord {
                tick: self.now,
                step_bits,
                direction_bits: (raw & DIRECTION_MASK) >> DIR_SHIFT,
            });
        }
    }

    fn set_direction_port(&mut self, bits: u8) {
        self.port = (self.port & !DIRECTION_MASK) | (bits & DIRECTION_MASK);
    }

    fn enable_steppers(&mut self, enable: bool) {
        self.steppers_enabled = enable;
    }
}

impl PulseTimer for VirtualHal {
    fn arm_pulse(&mut self, width_us: u8) {
        self.armed_pulse = Some(width_us);
    }
}

impl StepTimer for VirtualHal {
    fn start(&mut self) {
        self.timer_running = true;
    }

    fn stop(&mut self) {
        self.timer_running = false;
    }

    fn delay_ms(&mut self, ms: u16) {
        self.dwelled_ms += u32::from(ms);
    }
}
