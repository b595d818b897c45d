//! Step generation kernel.
//!
//! [`StepExecutor::tick`] is the periodic timer handler: it performs a
//! bounded amount of work per invocation, never allocates, and never
//! fails recoverably. Timing and axis distribution are two coupled
//! Bresenham-style integer algorithms:
//!
//! - The *inverse-time* counter decrements by the segment's
//!   `dist_per_tick` each tick; a sign change marks a step event due,
//!   and the counter reloads by the block's `dist_per_step`.
//! - Per-axis counters, seeded at half the block's step event count,
//!   decrement by the axis step counts on every event; a sign change
//!   fires that axis and reloads by the event count, guaranteeing exact
//!   per-axis totals.
//!
//! Step pulses are emitted one tick after their event is computed: the
//! handler entry writes the previously prepared port word and arms the
//! pulse-width one-shot, whose expiry calls [`StepExecutor::pulse_end`]
//! to drop the step lines. Direction lines are therefore always stable
//! a full tick before the first step edge of a block.

use step_port::{StepOutput, StepperHal, DIR_SHIFT, N_AXIS, STEP_MASK};

use crate::config::StepperConfig;
use crate::control::{ExecFlags, MachineState, SystemState};
use crate::planner::{PlannerBlock, PlannerQueue};
use crate::segment::{Segment, SegmentConsumer};

/// Segment loading sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LoadFlag {
    /// Pop a segment and bind a fresh planner block.
    #[default]
    LoadBlock,
    /// Pop a segment, keep the bound block and Bresenham phase.
    LoadSegment,
    /// A segment is loaded; go straight to the timing work.
    NoOp,
}

/// The hard-real-time step generator. Owns the consumer half of the
/// segment ring and the machine position.
pub struct StepExecutor<'r> {
    segments: SegmentConsumer<'r>,
    cfg: StepperConfig,
    /// Precomputed combined polarity mask for the port word.
    invert_mask: u8,

    load_flag: LoadFlag,
    exec_segment: Segment,
    exec_block: Option<PlannerBlock>,
    /// Step events left in the executing segment.
    step_count: u8,
    /// Phase-tail ticks left in the executing segment.
    phase_count: u8,
    /// Inverse-time counter reload, from the segment's shared data.
    dist_per_step: i32,
    counter_dist: i32,
    counters: [i32; N_AXIS],
    /// Direction half-word for the bound block, uninverted.
    dir_bits: u8,
    /// Port word to write on the next pulse rising edge.
    out_bits: u8,
    execute_step: bool,
    busy: bool,

    position: [i32; N_AXIS],
}

impl<'r> StepExecutor<'r> {
    pub fn new(segments: SegmentConsumer<'r>, cfg: StepperConfig) -> Self {
        let invert_mask = cfg.invert_mask();
        Self {
            segments,
            cfg,
            invert_mask,
            load_flag: LoadFlag::LoadBlock,
            exec_segment: Segment::EMPTY,
            exec_block: None,
            step_count: 0,
            phase_count: 0,
            dist_per_step: 0,
            counter_dist: 0,
            counters: [0; N_AXIS],
            dir_bits: 0,
            out_bits: invert_mask,
            execute_step: false,
            busy: false,
            position: [0; N_AXIS],
        }
    }

    /// Machine position in steps. On narrow-word targets callers must
    /// snapshot this with the step interrupt masked.
    pub fn position(&self) -> [i32; N_AXIS] {
        self.position
    }

    /// Overrides the machine position (homing, work offsets).
    pub fn set_position(&mut self, position: [i32; N_AXIS]) {
        self.position = position;
    }

    /// Clears the execution runtime state and discards buffered
    /// segments. The machine position survives; steps still in the
    /// pipeline are lost, which the caller reconciles (re-home or
    /// re-plan) after a reset.
    pub fn reset(&mut self) {
        self.segments.flush();
        self.load_flag = LoadFlag::LoadBlock;
        self.exec_segment = Segment::EMPTY;
        self.exec_block = None;
        self.step_count = 0;
        self.phase_count = 0;
        self.dist_per_step = 0;
        self.counter_dist = 0;
        self.counters = [0; N_AXIS];
        self.dir_bits = 0;
        self.out_bits = self.invert_mask;
        self.execute_step = false;
        self.busy = false;
    }

    /// Energizes the drivers, settles the port to its idle word, and
    /// starts the step timer.
    pub fn wake_up<H: StepperHal>(&mut self, hal: &mut H) {
        hal.enable_steppers(true);
        self.busy = false;
        self.execute_step = false;
        self.out_bits = self.invert_mask;
        hal.set_step_port(self.out_bits);
        hal.start();
    }

    /// Stops the step timer and settles the drivers: axes stay locked
    /// for the configured dwell so residual inertia cannot drift the
    /// position, then the drivers release. An alarm forces the release
    /// even when the configuration keeps drivers enabled at idle.
    pub fn go_idle<H: StepperHal>(&mut self, sys: &SystemState, hal: &mut H) {
        hal.stop();
        self.busy = false;
        let alarm = sys.state() == MachineState::Alarm;
        if self.cfg.idle_lock_ms != StepperConfig::KEEP_ENABLED || alarm {
            hal.delay_ms(u16::from(self.cfg.idle_lock_ms));
            hal.enable_steppers(false);
        }
    }

    /// The periodic step timer handler.
    pub fn tick<P: PlannerQueue, H: StepperHal>(
        &mut self,
        sys: &mut SystemState,
        planner: &mut P,
        hal: &mut H,
    ) {
        // Re-entrance means the tick budget was overrun; drop the
        // invocation rather than corrupt the counters.
        if self.busy {
            return;
        }
        if sys.state() == MachineState::Alarm {
            self.go_idle(sys, hal);
            return;
        }

        // Pulse rising edge for the event computed on the previous tick.
        if self.execute_step {
            self.execute_step = false;
            hal.set_step_port(self.out_bits);
            hal.arm_pulse(self.cfg.pulse_width_us);
        }

        self.busy = true;
        // On hardware, interrupts are re-enabled here so the pulse
        // falling-edge timer can preempt the segment work below.
        let loaded = match self.load_flag {
            LoadFlag::LoadBlock => self.load_block(sys, planner, hal),
            LoadFlag::LoadSegment => self.load_segment(sys, hal),
            LoadFlag::NoOp => true,
        };
        if loaded {
            self.run_segment(planner);
        }
        self.busy = false;
    }

    /// Pulse falling edge (one-shot timer expiry): restores the step
    /// lines to their idle level, leaving the direction lines untouched.
    pub fn pulse_end<H: StepOutput>(&self, hal: &mut H) {
        let idle = (self.out_bits & !STEP_MASK) | (self.cfg.step_invert_mask & STEP_MASK);
        hal.set_step_port(idle);
    }

    /// Pops the tail segment, or performs the orderly cycle stop when
    /// the ring has starved.
    fn next_segment<H: StepperHal>(
        &mut self,
        sys: &mut SystemState,
        hal: &mut H,
    ) -> Option<Segment> {
        if let Some(segment) = self.segments.current() {
            return Some(segment);
        }
        // Ring starved. While holding this is the stop point: keep the
        // drivers energized so the axes hold position. Otherwise the
        // cycle is complete.
        match sys.state() {
            MachineState::Hold => hal.stop(),
            _ => {
                sys.set_state(MachineState::Idle);
                self.go_idle(sys, hal);
            }
        }
        sys.set_exec_flag(ExecFlags::CYCLE_STOP);
        None
    }

    fn load_block<P: PlannerQueue, H: StepperHal>(
        &mut self,
        sys: &mut SystemState,
        planner: &mut P,
        hal: &mut H,
    ) -> bool {
        let Some(segment) = self.next_segment(sys, hal) else {
            return false;
        };
        let Some(block) = planner.current_block() else {
            // Upstream contract violation: segments without a block.
            debug_assert!(false, "segment queued without a current planner block");
            sys.set_state(MachineState::Idle);
            self.go_idle(sys, hal);
            sys.set_exec_flag(ExecFlags::CYCLE_STOP);
            return false;
        };

        self.exec_segment = segment;
        self.step_count = segment.n_step;
        self.phase_count = segment.n_phase_tick;
        self.dist_per_step = self.segments.dist_per_step(segment.data_index) as i32;
        self.counter_dist = self.dist_per_step;

        let half = (block.step_event_count >> 1) as i32;
        self.counters = [half; N_AXIS];
        self.dir_bits = (block.direction_bits & 0b111) << DIR_SHIFT;
        hal.set_direction_port(self.dir_bits ^ self.cfg.dir_invert_mask);
        // Pre-arm a direction-only write so the lines are stable a full
        // tick before the first step edge.
        self.out_bits = self.dir_bits ^ self.invert_mask;
        self.execute_step = true;

        self.exec_block = Some(block);
        self.load_flag = LoadFlag::NoOp;
        true
    }

    fn load_segment<H: StepperHal>(&mut self, sys: &mut SystemState, hal: &mut H) -> bool {
        let Some(segment) = self.next_segment(sys, hal) else {
            return false;
        };
        self.step_count = segment.n_step;
        self.phase_count = segment.n_phase_tick;
        // The data entry changes mid-block after a partial-block
        // reclaim; refreshing the reload value is cheap either way.
        self.dist_per_step = self.segments.dist_per_step(segment.data_index) as i32;
        self.exec_segment = segment;
        self.load_flag = LoadFlag::NoOp;
        true
    }

    /// One tick of timing work on the loaded segment.
    fn run_segment<P: PlannerQueue>(&mut self, planner: &mut P) {
        if self.step_count > 0 {
            self.counter_dist -= self.exec_segment.dist_per_tick as i32;
            if self.counter_dist < 0 {
                self.counter_dist += self.dist_per_step;
                self.step_event();
                self.step_count -= 1;
            }
        } else if self.phase_count > 0 {
            // Phase tail: the partial-step distance keeps accruing in
            // the counter without emitting, so pulse spacing stays
            // uniform across the segment boundary. A step that falls
            // due here fires on the next segment's first tick, where it
            // is accounted.
            self.counter_dist -= self.exec_segment.dist_per_tick as i32;
            self.phase_count -= 1;
        }

        if self.step_count == 0 && self.phase_count == 0 {
            if self.exec_segment.is_end_of_block() {
                planner.discard_current_block();
                self.exec_block = None;
                self.load_flag = LoadFlag::LoadBlock;
            } else {
                self.load_flag = LoadFlag::LoadSegment;
            }
            self.segments.advance();
        }
    }

    /// A step event is due: run the per-axis Bresenham, update the
    /// position, and prepare the port word for the next rising edge.
    fn step_event(&mut self) {
        let Some(block) = self.exec_block else {
            return;
        };
        let mut step_bits = 0u8;
        for axis in 0..N_AXIS {
            self.counters[axis] -= block.steps[axis] as i32;
            if self.counters[axis] < 0 {
                step_bits |= 1 << axis;
                self.counters[axis] += block.step_event_count as i32;
                if block.direction_bits & (1 << axis) != 0 {
                    self.position[axis] -= 1;
                } else {
                    self.position[axis] += 1;
                }
            }
        }
        self.out_bits = (self.dir_bits | step_bits) ^ self.invert_mask;
        self.execute_step = true;
    }
}
