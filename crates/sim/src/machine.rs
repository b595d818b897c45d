//! Virtual machine: the full pipeline wired to virtual hardware.
//!
//! Owns the planner fake, the preparer and executor halves of a segment
//! ring, the shared system state, and a [`VirtualHal`] behind a
//! critical-section mutex, the same shape the pieces take on a real
//! single-core target. [`Machine::tick`] advances one step-timer period:
//! one executor invocation (when the timer runs), the pulse falling
//! edge, then a main-loop preparation pass.

use core::cell::RefCell;

use critical_section::Mutex;
use motion_exec::{
    ExecFlags, MachineState, PlannerBlock, SegmentPreparer, SegmentRing, StepExecutor,
    StepperConfig, SystemState,
};
use step_port::StepTimer;
use tracing::debug;

use crate::error::SimError;
use crate::hal::VirtualHal;
use crate::planner::BlockQueue;
use crate::trace::MotionTrace;

pub struct Machine<'r> {
    planner: BlockQueue,
    prep: SegmentPreparer<'r>,
    exec: StepExecutor<'r>,
    sys: SystemState,
    hal: Mutex<RefCell<VirtualHal>>,
    cfg: StepperConfig,
}

impl<'r> Machine<'r> {
    /// Builds the machine over a caller-owned segment ring.
    pub fn new(ring: &'r mut SegmentRing, cfg: StepperConfig) -> Self {
        let (producer, consumer) = ring.split();
        Self {
            planner: BlockQueue::new(),
            prep: SegmentPreparer::new(producer),
            exec: StepExecutor::new(consumer, cfg),
            sys: SystemState::new(),
            hal: Mutex::new(RefCell::new(VirtualHal::new(cfg))),
            cfg,
        }
    }

    /// Queues a block and stages the cycle.
    pub fn enqueue(&mut self, block: PlannerBlock) -> Result<(), SimError> {
        self.planner.push(block)?;
        self.sys.queue();
        Ok(())
    }

    /// Starts (or resumes) the cycle: primes the preparer and wakes the
    /// executor. Resuming from a feed hold reclaims the parked block
    /// and replans it over its remainder from standstill.
    pub fn cycle_start(&mut self) -> Result<(), SimError> {
        if self.sys.state() == MachineState::Hold {
            let index = self.prep.prep_block_index();
            if let Some(update) = self.prep.fetch_partial_block(index) {
                debug!(
                    mm_remaining = update.millimeters_remaining,
                    "resuming held block"
                );
                self.planner.replan_front(update, 0.0);
            }
        }
        self.sys.start_cycle()?;
        self.sys.clear_exec_flag(ExecFlags::CYCLE_STOP);
        self.prep.prepare(&mut self.sys, &self.planner);
        let exec = &mut self.exec;
        critical_section::with(|cs| {
            let mut guard = self.hal.borrow_ref_mut(cs);
            exec.wake_up(&mut *guard);
        });
        Ok(())
    }

    /// Initiates a feed hold: deceleration to a controlled stop with
    /// the plan retained.
    pub fn feed_hold(&mut self) -> Result<(), SimError> {
        self.sys.hold()?;
        self.prep.begin_hold();
        Ok(())
    }

    /// Tells the preparer the planner recomputed in-flight block
    /// speeds; the bound block is re-entered through the continuation
    /// path on the next preparation pass.
    pub fn cycle_reinitialize(&mut self) {
        self.prep.reload_block_parameters();
    }

    /// Forces the alarm lockout and kills the drivers.
    pub fn alarm(&mut self) {
        self.sys.alarm();
        let exec = &mut self.exec;
        let sys = &self.sys;
        critical_section::with(|cs| {
            let mut guard = self.hal.borrow_ref_mut(cs);
            exec.go_idle(sys, &mut *guard);
        });
    }

    /// Full stop and state wipe: execution state, buffered segments,
    /// and queued blocks. Machine position survives.
    pub fn reset(&mut self) {
        critical_section::with(|cs| {
            let mut guard = self.hal.borrow_ref_mut(cs);
            guard.stop();
        });
        self.sys.reset();
        self.exec.reset();
        self.planner.clear();
        self.prep.reset(self.planner.head_index());
    }

    /// One step-timer period.
    pub fn tick(&mut self) {
        let exec = &mut self.exec;
        let sys = &mut self.sys;
        let planner = &mut self.planner;
        let hal_cell = &self.hal;
        critical_section::with(|cs| {
            let mut guard = hal_cell.borrow_ref_mut(cs);
            let hal = &mut *guard;
            hal.now += 1;
            if hal.timer_running {
                exec.tick(sys, planner, hal);
                if hal.armed_pulse.take().is_some() {
                    exec.pulse_end(hal);
                }
            }
        });
        self.prep.prepare(&mut self.sys, &self.planner);
    }

    /// Ticks until the step timer stops, with a budget.
    pub fn run_until_stopped(&mut self, max_ticks: u64) -> Result<u64, SimError> {
        let mut ticks = 0;
        while self.timer_running() {
            if ticks >= max_ticks {
                return Err(SimError::Timeout(max_ticks));
            }
            self.tick();
            ticks += 1;
        }
        Ok(ticks)
    }

    pub fn state(&self) -> MachineState {
        self.sys.state()
    }

    pub fn exec_flags(&self) -> ExecFlags {
        self.sys.exec_flags()
    }

    pub fn position(&self) -> [i32; 3] {
        self.exec.position()
    }

    pub fn planner(&self) -> &BlockQueue {
        &self.planner
    }

    pub fn planner_mut(&mut self) -> &mut BlockQueue {
        &mut self.planner
    }

    pub fn timer_running(&self) -> bool {
        self.with_hal(|hal| hal.timer_running)
    }

    pub fn steppers_enabled(&self) -> bool {
        self.with_hal(|hal| hal.steppers_enabled)
    }

    pub fn pulses_per_axis(&self) -> [u32; 3] {
        self.with_hal(|hal| hal.pulses_per_axis())
    }

    pub fn now(&self) -> u64 {
        self.with_hal(|hal| hal.now)
    }

    /// Runs a closure against the virtual hardware.
    pub fn with_hal<R>(&self, f: impl FnOnce(&mut VirtualHal) -> R) -> R {
        critical_section::with(|cs| f(&mut self.hal.borrow_ref_mut(cs)))
    }

    /// Snapshot of the recorded motion for offline analysis.
    pub fn trace(&self) -> MotionTrace {
        self.with_hal(|hal| MotionTrace::capture(&self.cfg, hal, self.exec.position()))
    }
}
