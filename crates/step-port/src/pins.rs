//! Adapter driving discrete GPIO pins from the packed port word.
//!
//! MCUs without a free contiguous GPIO bank can still run the kernel by
//! fanning the port word out to individual `embedded-hal` output pins.
//! The per-write cost is six pin writes instead of one port store, which
//! is acceptable well past typical step rates.

use embedded_hal::digital::{OutputPin, PinState};

use crate::{direction_bit, step_bit, StepOutput, N_AXIS};

/// [`StepOutput`] implementation over individual `OutputPin`s.
///
/// Fields are public so tests and board setup code can reclaim the pins.
pub struct StepPins<P: OutputPin> {
    pub step: [P; N_AXIS],
    pub dir: [P; N_AXIS],
    pub enable: P,
    /// Enable line is active-low (common for Pololu-style drivers).
    pub enable_active_low: bool,
}

impl<P: OutputPin> StepPins<P> {
    pub fn new(step: [P; N_AXIS], dir: [P; N_AXIS], enable: P, enable_active_low: bool) -> Self {
        Self {
            step,
            dir,
            enable,
            enable_active_low,
        }
    }
}

impl<P: OutputPin> StepOutput for StepPins<P> {
    fn set_step_port(&mut self, bits: u8) {
        for axis in 0..N_AXIS {
            let step = bits & step_bit(axis) != 0;
            self.step[axis].set_state(PinState::from(step)).ok();
            let dir = bits & direction_bit(axis) != 0;
            self.dir[axis].set_state(PinState::from(dir)).ok();
        }
    }

    fn set_direction_port(&mut self, bits: u8) {
        for axis in 0..N_AXIS {
            let dir = bits & direction_bit(axis) != 0;
            self.dir[axis].set_state(PinState::from(dir)).ok();
        }
    }

    fn enable_steppers(&mut self, enable: bool) {
        let level = enable != self.enable_active_low;
        self.enable.set_state(PinState::from(level)).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::pin::{Mock as PinMock, State, Transaction};

    #[test]
    fn port_word_maps_to_pin_levels() {
        // X step high, Z direction high, everything else low.
        let bits = step_bit(0) | direction_bit(2);

        let step = [
            PinMock::new(&[Transaction::set(State::High)]),
            PinMock::new(&[Transaction::set(State::Low)]),
            PinMock::new(&[Transaction::set(State::Low)]),
        ];
        let dir = [
            PinMock::new(&[Transaction::set(State::Low)]),
            PinMock::new(&[Transaction::set(State::Low)]),
            PinMock::new(&[Transaction::set(State::High)]),
        ];
        let enable = PinMock::new(&[]);

        let mut pins = StepPins::new(step, dir, enable, true);
        pins.set_step_port(bits);

        for mut pin in pins.step.into_iter().chain(pins.dir) {
            pin.done();
        }
        pins.enable.done();
    }

    #[test]
    fn active_low_enable_inverts_level() {
        let mk = || PinMock::new(&[]);
        let enable = PinMock::new(&[
            Transaction::set(State::Low),  // enabled
            Transaction::set(State::High), // released
        ]);

        let mut pins = StepPins::new([mk(), mk(), mk()], [mk(), mk(), mk()], enable, true);
        pins.enable_steppers(true);
        pins.enable_steppers(false);

        pins.enable.done();
        for mut pin in pins.step.into_iter().chain(pins.dir) {
            pin.done();
        }
    }
}
