//! Segment preparer: slices planner-block velocity profiles into
//! fixed-time segments for the step kernel.
//!
//! Runs cooperatively in the main loop. Each call to
//! [`SegmentPreparer::prepare`] pushes as many segments as the ring will
//! take. Per block the work splits into three phases: intake (bind the
//! block, classify its velocity profile), time-sliced advance (simulate
//! one `DT_SEGMENT` quantum through the profile), and emission (convert
//! the slice into an integer segment).
//!
//! All profile arithmetic is carried in step units: rates in steps/s,
//! acceleration in steps/s^2, and the accelerate/decelerate thresholds
//! as "step events remaining", counting down from the block total to
//! zero. Step counts per segment come from ceiling-difference
//! bookkeeping on the remaining-steps float, which telescopes to exactly
//! `step_event_count` over the block no matter how the float noise
//! falls.

use crate::control::{MachineState, SystemState};
use crate::planner::{BlockIndex, PlannerBlock, PlannerQueue};
use crate::segment::{BlockData, Segment, SegmentProducer, SEG_FLAG_END_OF_BLOCK};
use crate::{DT_SEGMENT, INV_TIME_MULTIPLIER, ISR_RATE};

#[cfg(feature = "std")]
#[inline]
fn sqrtf(v: f32) -> f32 {
    v.sqrt()
}

#[cfg(feature = "std")]
#[inline]
fn ceilf(v: f32) -> f32 {
    v.ceil()
}

#[cfg(not(feature = "std"))]
use libm::{ceilf, sqrtf};

/// Minimum step-distance a segment must cover, guaranteeing at least one
/// whole step event per segment with margin for float error.
const MIN_STEP_INCREMENT: f32 = 1.25;

/// Residue below which a segment time quantum counts as consumed.
const DT_MIN_RESIDUE: f32 = 1e-6;

/// Floor on the terminal-ramp rate sum, guarding the time division when
/// both the current and exit rates have decayed to zero.
const MIN_TERMINAL_RATE: f32 = 1.0;

/// Where the next block intake picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrepState {
    /// Next intake initializes from the planner block.
    #[default]
    FreshBlock,
    /// Next intake continues a reclaimed block, carrying the previous
    /// entry's bookkeeping.
    PartialBlock,
    /// A feed hold stopped mid-block; no further slicing until the
    /// block is reclaimed or the preparer is reset.
    Draining,
}

/// Snapshot returned to the planner when it reclaims the in-flight
/// block for replanning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialUpdate {
    /// Path length still to execute, in millimeters.
    pub millimeters_remaining: f32,
    /// Whether the block is already past its deceleration point.
    pub is_decelerating: bool,
}

/// The block currently bound for preparation.
#[derive(Debug, Clone, Copy)]
struct PrepBlock {
    block: PlannerBlock,
    data_index: u8,
    /// Step events remaining at which slicing stops. Zero at the block
    /// end; nonzero when a feed hold forces a stop inside the block.
    steps_complete: f32,
}

/// The segment preparer. Owns the producer half of the segment ring.
pub struct SegmentPreparer<'r> {
    producer: SegmentProducer<'r>,
    state: PrepState,
    prep_index: BlockIndex,
    block: Option<PrepBlock>,
}

impl<'r> SegmentPreparer<'r> {
    pub fn new(producer: SegmentProducer<'r>) -> Self {
        Self {
            producer,
            state: PrepState::FreshBlock,
            prep_index: 0,
            block: None,
        }
    }

    /// Index of the planner block currently being prepared.
    pub fn prep_block_index(&self) -> BlockIndex {
        self.prep_index
    }

    pub fn prep_state(&self) -> PrepState {
        self.state
    }

    /// Drops all preparation state and restarts at `first_index`.
    pub fn reset(&mut self, first_index: BlockIndex) {
        self.block = None;
        self.state = PrepState::FreshBlock;
        self.prep_index = first_index;
    }

    /// Fills the segment ring. Call from every main-loop pass while a
    /// cycle is active; returns as soon as the ring is full, the planner
    /// is drained, or a feed hold has reached its stop point.
    pub fn prepare<P: PlannerQueue>(&mut self, sys: &mut SystemState, planner: &P) {
        if !matches!(sys.state(), MachineState::Cycle | MachineState::Hold) {
            // Queued means motion is staged but not started; everything
            // else has nothing to prepare.
            return;
        }
        loop {
            if self.state == PrepState::Draining {
                return;
            }
            if self.producer.is_full() {
                return;
            }
            if self.block.is_none() && !self.intake(sys, planner) {
                return;
            }
            if !self.slice(planner) {
                return;
            }
        }
    }

    /// Phase A: bind the planner block at `prep_index` and classify its
    /// velocity profile.
    fn intake<P: PlannerQueue>(&mut self, sys: &SystemState, planner: &P) -> bool {
        let Some(block) = planner.block(self.prep_index) else {
            return false; // pipeline drained
        };
        debug_assert!(block.step_event_count > 0);
        debug_assert!(block.nominal_speed_sqr > 0.0);
        debug_assert!(block.millimeters > 0.0);

        let previous = self.producer.data_index();
        let data_index = self.producer.advance_data();

        match self.state {
            PrepState::PartialBlock => {
                // Continuation of a reclaimed block: carry the previous
                // entry's bookkeeping into the new one.
                let inherited = *self.producer.data(previous);
                let carried = self.producer.dist_per_step(previous);
                *self.producer.data(data_index) = BlockData {
                    step_events_remaining: inherited.step_events_remaining,
                    step_per_mm: inherited.step_per_mm,
                    acceleration: inherited.acceleration,
                    ..BlockData::EMPTY
                };
                self.producer.set_dist_per_step(data_index, carried);
                self.state = PrepState::FreshBlock;
            }
            PrepState::FreshBlock => {
                let step_per_mm = block.step_event_count as f32 / block.millimeters;
                *self.producer.data(data_index) = BlockData {
                    step_events_remaining: block.step_event_count as f32,
                    step_per_mm,
                    acceleration: step_per_mm * block.acceleration,
                    ..BlockData::EMPTY
                };
                // Clamped at one full distance unit so the executor's
                // signed counter arithmetic holds even for absurdly
                // coarse axis resolutions (under one step per mm).
                let dist = ceilf(INV_TIME_MULTIPLIER / step_per_mm).min(INV_TIME_MULTIPLIER) as u32;
                self.producer.set_dist_per_step(data_index, dist);
            }
            PrepState::Draining => return false,
        }

        let exit_speed_sqr = planner
            .block(planner.next_index(self.prep_index))
            .map(|next| next.entry_speed_sqr)
            .unwrap_or(0.0);
        profile(self.producer.data(data_index), &block, exit_speed_sqr);

        self.block = Some(PrepBlock {
            block,
            data_index,
            steps_complete: 0.0,
        });

        if sys.state() == MachineState::Hold {
            self.begin_hold();
        }
        true
    }

    /// Phases B and C: advance one time quantum through the profile and
    /// emit the resulting segment. Returns `false` when nothing was
    /// emitted (hold stop reached without a whole step pending).
    fn slice<P: PlannerQueue>(&mut self, planner: &P) -> bool {
        let Some(prep) = self.block.as_ref() else {
            return false;
        };
        let data_index = prep.data_index;
        let steps_complete = prep.steps_complete;
        let mut data = *self.producer.data(data_index);

        // --- Phase B: time-sliced advance -------------------------------
        let seg_start = data.step_events_remaining;
        let mut steps_remaining = seg_start;
        let mut dt = 0.0_f32;
        let mut dt_max = DT_SEGMENT;
        let mut time_var = dt_max;
        let minimum_steps = (steps_remaining - MIN_STEP_INCREMENT).max(0.0);

        loop {
            if steps_remaining > data.accelerate_until {
                // Acceleration ramp. Only ever the first pass.
                let speed_var = data.acceleration * time_var;
                steps_remaining -= time_var * (data.current_rate + 0.5 * speed_var);
                if steps_remaining < data.accelerate_until {
                    // Junction into cruise, deceleration, or block end.
                    steps_remaining = data.accelerate_until;
                    time_var = 2.0 * (seg_start - steps_remaining)
                        / (data.current_rate + data.maximum_rate);
                    data.current_rate = data.maximum_rate;
                } else {
                    data.current_rate += speed_var;
                }
            } else if steps_remaining > data.decelerate_after {
                // Cruise ramp.
                let steps_var = steps_remaining - data.maximum_rate * time_var;
                if steps_var < data.decelerate_after {
                    time_var = (steps_remaining - data.decelerate_after) / data.maximum_rate;
                    steps_remaining = data.decelerate_after;
                } else {
                    steps_remaining = steps_var;
                }
            } else {
                // Deceleration ramp.
                let speed_var = data.acceleration * time_var;
                let mut terminal = true;
                if data.current_rate > speed_var {
                    let steps_var =
                        steps_remaining - time_var * (data.current_rate - 0.5 * speed_var);
                    if steps_var > steps_complete {
                        steps_remaining = steps_var;
                        data.current_rate -= speed_var;
                        terminal = false;
                    }
                }
                if terminal {
                    // End of block, or end of a forced deceleration.
                    time_var = 2.0 * (steps_remaining - steps_complete)
                        / (data.current_rate + data.exit_rate).max(MIN_TERMINAL_RATE);
                    steps_remaining = steps_complete;
                    data.current_rate = data.exit_rate;
                }
            }

            dt += time_var;
            if dt_max - dt > DT_MIN_RESIDUE {
                time_var = dt_max - dt; // ramp junction mid-quantum
            } else if steps_remaining > minimum_steps {
                // Too slow to cover a whole step yet; stretch the
                // segment by another quantum.
                dt_max += DT_SEGMENT;
                time_var = dt_max - dt;
            } else {
                break; // segment time maxed
            }
            if steps_remaining <= steps_complete {
                break; // profile exhausted
            }
        }

        // --- Phase C: segment emission ----------------------------------
        let dist_per_step = self.producer.dist_per_step(data_index) as f32;
        let n_steps_remaining = ceilf(steps_remaining);
        let last_n_steps = ceilf(data.step_events_remaining);
        let n_step = (last_n_steps - n_steps_remaining) as u32;

        if n_step == 0 {
            // Only reachable when a forced deceleration stops short of a
            // whole step: park the remainder and quit slicing.
            debug_assert!(steps_complete > 0.0);
            data.current_rate = 0.0;
            data.step_events_remaining = n_steps_remaining;
            *self.producer.data(data_index) = data;
            self.state = PrepState::Draining;
            return false;
        }
        debug_assert!(n_step <= u8::MAX as u32);

        let steps_consumed = data.step_events_remaining - steps_remaining;
        let rate = steps_consumed / dt; // average steps/s over the slice
        let dist_per_tick = (ceilf(rate * dist_per_step / ISR_RATE as f32).min(dist_per_step)
            as u32)
            .max(1);

        let mut flags = 0u8;
        let n_phase_tick;
        if steps_remaining == steps_complete {
            n_phase_tick = 0;
            if steps_remaining > 0.0 {
                // Feed-hold stop point inside the block. Round the
                // remainder up to whole steps so the executed plus
                // parked counts telescope exactly, then drain.
                data.current_rate = 0.0;
                data.step_events_remaining = n_steps_remaining;
                self.state = PrepState::Draining;
            } else {
                flags |= SEG_FLAG_END_OF_BLOCK;
                data.step_events_remaining = 0.0;
            }
        } else {
            let frac = n_steps_remaining - steps_remaining;
            n_phase_tick = ceilf(frac * dist_per_step / dist_per_tick as f32).min(255.0) as u8;
            data.step_events_remaining = steps_remaining;
        }

        *self.producer.data(data_index) = data;
        self.producer.publish(Segment {
            n_step: n_step as u8,
            n_phase_tick,
            dist_per_tick,
            data_index,
            flags,
        });

        if flags & SEG_FLAG_END_OF_BLOCK != 0 {
            self.prep_index = planner.next_index(self.prep_index);
            self.block = None;
        }
        true
    }

    /// Forces the bound block into a deceleration-to-zero profile for a
    /// feed hold: no further acceleration, immediate deceleration, and
    /// either an in-block stop point or a carry-over exit rate when the
    /// block cannot stop within its remainder. Blocks taken in while the
    /// hold is active get the same treatment.
    pub fn begin_hold(&mut self) {
        let Some(prep) = self.block.as_mut() else {
            return;
        };
        let data = self.producer.data(prep.data_index);
        let remaining = data.step_events_remaining;
        data.accelerate_until = remaining;
        data.decelerate_after = remaining;
        let decel_dist = data.current_rate * data.current_rate / (2.0 * data.acceleration);
        if decel_dist < remaining {
            prep.steps_complete = remaining - decel_dist;
            data.exit_rate = 0.0;
        } else {
            prep.steps_complete = 0.0;
            data.exit_rate = sqrtf(
                (data.current_rate * data.current_rate - 2.0 * data.acceleration * remaining)
                    .max(0.0),
            );
        }
    }

    /// Reclaims the in-flight block for replanning. Reports the residual
    /// distance and ramp state, unbinds the block, and routes the next
    /// intake through the continuation path.
    pub fn fetch_partial_block(&mut self, index: BlockIndex) -> Option<PartialUpdate> {
        let prep = self.block.as_ref()?;
        if index != self.prep_index {
            return None;
        }
        let data = *self.producer.data(prep.data_index);
        let update = PartialUpdate {
            millimeters_remaining: data.step_events_remaining / data.step_per_mm,
            is_decelerating: data.step_events_remaining < data.decelerate_after,
        };
        self.block = None;
        self.state = PrepState::PartialBlock;
        Some(update)
    }

    /// Flags the bound block for re-fetch with carried bookkeeping.
    /// Called after the planner recomputed in-flight block speeds.
    pub fn reload_block_parameters(&mut self) {
        if self.block.take().is_some() {
            self.state = PrepState::PartialBlock;
        }
    }
}

/// Seven-way velocity profile classification, in millimeter units, then
/// converted to step units. `accelerate_until` and `decelerate_after`
/// are step events remaining (distance from the block end).
fn profile(data: &mut BlockData, block: &PlannerBlock, exit_speed_sqr: f32) {
    let inv_2_accel = 0.5 / block.acceleration;
    let length = block.millimeters;
    let entry_sqr = block.entry_speed_sqr;
    let nominal_sqr = block.nominal_speed_sqr;

    let accelerate_until_mm;
    let mut decelerate_after_mm;
    let maximum_speed;

    let intersect = 0.5 * (length + inv_2_accel * (entry_sqr - exit_speed_sqr));
    if intersect > 0.0 {
        if intersect < length {
            decelerate_after_mm = inv_2_accel * (nominal_sqr - exit_speed_sqr);
            if decelerate_after_mm < intersect {
                // Trapezoid, cruise-deceleration, or pure cruise.
                maximum_speed = sqrtf(nominal_sqr);
                if entry_sqr == nominal_sqr {
                    accelerate_until_mm = length;
                } else {
                    accelerate_until_mm = length - inv_2_accel * (nominal_sqr - entry_sqr);
                }
            } else {
                // Triangle: the nominal speed is never reached.
                accelerate_until_mm = intersect;
                decelerate_after_mm = intersect;
                maximum_speed = sqrtf(2.0 * block.acceleration * intersect + exit_speed_sqr);
            }
        } else {
            // Deceleration through the entire block.
            accelerate_until_mm = length;
            decelerate_after_mm = length;
            maximum_speed = sqrtf(entry_sqr);
        }
    } else {
        // Acceleration through the entire block.
        accelerate_until_mm = 0.0;
        decelerate_after_mm = 0.0;
        maximum_speed = sqrtf(exit_speed_sqr);
    }

    let spm = data.step_per_mm;
    data.accelerate_until = accelerate_until_mm * spm;
    data.decelerate_after = decelerate_after_mm * spm;
    data.maximum_rate = maximum_speed * spm;
    data.exit_rate = sqrtf(exit_speed_sqr) * spm;
    data.current_rate = sqrtf(entry_sqr) * spm;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentRing;
    use float_cmp::approx_eq;
    use heapless::Deque;

    struct StubPlanner {
        blocks: Deque<PlannerBlock, 8>,
        base: BlockIndex,
    }

    impl StubPlanner {
        fn new(blocks: &[PlannerBlock]) -> Self {
            let mut deque = Deque::new();
            for block in blocks {
                deque.push_back(*block).unwrap();
            }
            Self {
                blocks: deque,
                base: 0,
            }
        }
    }

    impl PlannerQueue for StubPlanner {
        fn block(&self, index: BlockIndex) -> Option<PlannerBlock> {
            let offset = index.wrapping_sub(self.base) as usize;
            self.blocks.iter().nth(offset).copied()
        }

        fn next_index(&self, index: BlockIndex) -> BlockIndex {
            index.wrapping_add(1)
        }

        fn current_block(&self) -> Option<PlannerBlock> {
            self.blocks.front().copied()
        }

        fn discard_current_block(&mut self) {
            self.blocks.pop_front();
            self.base = self.base.wrapping_add(1);
        }
    }

    fn data_with_spm(step_per_mm: f32) -> BlockData {
        BlockData {
            step_per_mm,
            ..BlockData::EMPTY
        }
    }

    fn cycling() -> SystemState {
        let mut sys = SystemState::new();
        sys.queue();
        sys.start_cycle().unwrap();
        sys
    }

    #[test]
    fn profile_pure_cruise() {
        let block = PlannerBlock::new([100, 0, 0], 0, 10.0, 100.0, 100.0, 100.0);
        let mut data = data_with_spm(10.0);
        profile(&mut data, &block, 100.0);
        assert!(approx_eq!(f32, data.accelerate_until, 100.0, epsilon = 1e-3));
        assert!(approx_eq!(f32, data.decelerate_after, 0.0, epsilon = 1e-3));
        assert!(approx_eq!(f32, data.maximum_rate, 100.0, epsilon = 1e-3));
    }

    #[test]
    fn profile_cruise_deceleration() {
        // Entry at nominal, exit below: cruise then decelerate.
        let block = PlannerBlock::new([100, 0, 0], 0, 10.0, 100.0, 100.0, 100.0);
        let mut data = data_with_spm(10.0);
        profile(&mut data, &block, 0.0);
        assert!(approx_eq!(f32, data.accelerate_until, 100.0, epsilon = 1e-3));
        // (100 - 0) / (2 * 100) = 0.5 mm -> 5 steps
        assert!(approx_eq!(f32, data.decelerate_after, 5.0, epsilon = 1e-3));
    }

    #[test]
    fn profile_acceleration_cruise() {
        let block = PlannerBlock::new([100, 0, 0], 0, 10.0, 0.0, 100.0, 100.0);
        let mut data = data_with_spm(10.0);
        profile(&mut data, &block, 100.0);
        // Acceleration takes (100 - 0) / (2 * 100) = 0.5 mm.
        assert!(approx_eq!(f32, data.accelerate_until, 95.0, epsilon = 1e-3));
        assert!(approx_eq!(f32, data.decelerate_after, 0.0, epsilon = 1e-3));
    }

    #[test]
    fn profile_symmetric_trapezoid() {
        let block = PlannerBlock::new([1000, 1000, 0], 0, 100.0, 0.0, 2500.0, 500.0);
        let mut data = data_with_spm(10.0);
        profile(&mut data, &block, 0.0);
        // Acceleration ends 2.5 mm in -> 97.5 mm remaining -> 975 steps.
        assert!(approx_eq!(f32, data.accelerate_until, 975.0, epsilon = 0.01));
        assert!(approx_eq!(f32, data.decelerate_after, 25.0, epsilon = 0.01));
        assert!(approx_eq!(f32, data.maximum_rate, 500.0, epsilon = 0.01));
    }

    #[test]
    fn profile_triangle_peak_below_nominal() {
        let block = PlannerBlock::new([100, 0, 0], 0, 1.0, 0.0, 10_000.0, 500.0);
        let mut data = data_with_spm(100.0);
        profile(&mut data, &block, 0.0);
        assert!(approx_eq!(f32, data.accelerate_until, 50.0, epsilon = 0.01));
        assert!(approx_eq!(f32, data.decelerate_after, 50.0, epsilon = 0.01));
        // sqrt(2 * 500 * 0.5) = sqrt(500) mm/s, well below 100 mm/s.
        let expected = 500.0_f32.sqrt() * 100.0;
        assert!(approx_eq!(f32, data.maximum_rate, expected, epsilon = 1.0));
        assert!(data.maximum_rate < 10_000.0 * 0.5);
    }

    #[test]
    fn profile_deceleration_only() {
        let block = PlannerBlock::new([100, 0, 0], 0, 1.0, 10_000.0, 10_000.0, 500.0);
        let mut data = data_with_spm(100.0);
        profile(&mut data, &block, 0.0);
        assert!(approx_eq!(f32, data.accelerate_until, 100.0, epsilon = 0.01));
        assert!(approx_eq!(f32, data.decelerate_after, 100.0, epsilon = 0.01));
        assert!(approx_eq!(f32, data.maximum_rate, 10_000.0, epsilon = 1.0));
    }

    #[test]
    fn profile_acceleration_only() {
        let block = PlannerBlock::new([100, 0, 0], 0, 1.0, 0.0, 10_000.0, 500.0);
        let mut data = data_with_spm(100.0);
        profile(&mut data, &block, 10_000.0);
        assert!(approx_eq!(f32, data.accelerate_until, 0.0, epsilon = 0.01));
        assert!(approx_eq!(f32, data.decelerate_after, 0.0, epsilon = 0.01));
        assert!(approx_eq!(f32, data.maximum_rate, 10_000.0, epsilon = 1.0));
    }

    /// Drains every prepared segment for the head block, returning
    /// (total steps, segment count, max dist_per_tick).
    fn drain_block(
        prep: &mut SegmentPreparer<'_>,
        consumer: &mut crate::segment::SegmentConsumer<'_>,
        sys: &mut SystemState,
        planner: &StubPlanner,
    ) -> (u32, u32, u32) {
        let mut total = 0u32;
        let mut count = 0u32;
        let mut max_rate = 0u32;
        for _ in 0..100_000 {
            prep.prepare(sys, planner);
            let Some(segment) = consumer.current() else {
                break;
            };
            assert!(segment.n_step >= 1, "zero-step segment enqueued");
            total += u32::from(segment.n_step);
            count += 1;
            max_rate = max_rate.max(segment.dist_per_tick);
            let end = segment.is_end_of_block();
            consumer.advance();
            if end {
                break;
            }
        }
        (total, count, max_rate)
    }

    #[test]
    fn step_counts_telescope_to_block_total() {
        let mut ring = SegmentRing::new();
        let (producer, mut consumer) = ring.split();
        let mut prep = SegmentPreparer::new(producer);
        let mut sys = cycling();
        let planner = StubPlanner::new(&[PlannerBlock::new(
            [1000, 1000, 0],
            0,
            100.0,
            0.0,
            2500.0,
            500.0,
        )]);

        let (total, count, max_rate) = drain_block(&mut prep, &mut consumer, &mut sys, &planner);
        assert_eq!(total, 1000);
        assert!(count > 10, "trapezoid should slice into many segments");

        // Cruise rate: 50 mm/s * 10 steps/mm = 500 steps/s.
        let dist_per_step = (INV_TIME_MULTIPLIER / 10.0).ceil();
        let expected = (500.0 * dist_per_step / ISR_RATE as f32).ceil() as u32;
        assert!(
            max_rate >= expected - 50 && max_rate <= expected + 50,
            "cruise dist_per_tick {max_rate} not near {expected}"
        );
    }

    #[test]
    fn single_step_block_is_one_end_of_block_segment() {
        let mut ring = SegmentRing::new();
        let (producer, mut consumer) = ring.split();
        let mut prep = SegmentPreparer::new(producer);
        let mut sys = cycling();
        let planner = StubPlanner::new(&[PlannerBlock::new(
            [1, 0, 0],
            0,
            0.1,
            0.0,
            100.0,
            100.0,
        )]);

        prep.prepare(&mut sys, &planner);
        let segment = consumer.current().expect("one segment");
        assert_eq!(segment.n_step, 1);
        assert!(segment.is_end_of_block());
        consumer.advance();

        prep.prepare(&mut sys, &planner);
        assert!(consumer.current().is_none(), "planner drained");
    }

    #[test]
    fn hold_decelerates_and_parks_remainder() {
        let mut ring = SegmentRing::new();
        let (producer, mut consumer) = ring.split();
        let mut prep = SegmentPreparer::new(producer);
        let mut sys = cycling();
        // Long cruise block entering at nominal speed.
        let planner = StubPlanner::new(&[PlannerBlock::new(
            [300, 0, 0],
            0,
            30.0,
            400.0,
            400.0,
            100.0,
        )]);

        // Let a couple of segments through, then hold.
        prep.prepare(&mut sys, &planner);
        let mut executed = 0u32;
        for _ in 0..2 {
            let segment = consumer.current().unwrap();
            executed += u32::from(segment.n_step);
            consumer.advance();
        }
        sys.hold().unwrap();
        prep.begin_hold();

        // Drain everything the hold deceleration still emits.
        for _ in 0..10_000 {
            prep.prepare(&mut sys, &planner);
            let Some(segment) = consumer.current() else {
                break;
            };
            assert!(!segment.is_end_of_block(), "hold must not finish the block");
            executed += u32::from(segment.n_step);
            consumer.advance();
        }
        assert_eq!(prep.prep_state(), PrepState::Draining);

        // Deceleration from 200 steps/s at 1000 steps/s^2 covers about
        // 20 steps past the segments already in flight.
        assert!(executed < 300);

        let update = prep
            .fetch_partial_block(prep.prep_block_index())
            .expect("block is reclaimable");
        assert!(update.is_decelerating);
        // Executed plus parked must cover the block exactly.
        let parked = (update.millimeters_remaining * 10.0).round() as u32;
        assert_eq!(executed + parked, 300);
        assert_eq!(prep.prep_state(), PrepState::PartialBlock);
    }

    #[test]
    fn back_to_back_blocks_share_junction_rate() {
        let mut ring = SegmentRing::new();
        let (producer, mut consumer) = ring.split();
        let mut prep = SegmentPreparer::new(producer);
        let mut sys = cycling();
        // Junction at sqrt(200) mm/s between the two blocks.
        let planner = StubPlanner::new(&[
            PlannerBlock::new([200, 0, 0], 0, 20.0, 0.0, 400.0, 100.0),
            PlannerBlock::new([200, 0, 0], 0, 20.0, 200.0, 400.0, 100.0),
        ]);

        let mut last_rate_block1 = 0u32;
        let mut first_rate_block2 = 0u32;
        let mut in_first = true;
        for _ in 0..100_000 {
            prep.prepare(&mut sys, &planner);
            let Some(segment) = consumer.current() else {
                break;
            };
            if in_first {
                last_rate_block1 = segment.dist_per_tick;
                if segment.is_end_of_block() {
                    in_first = false;
                }
            } else if first_rate_block2 == 0 {
                first_rate_block2 = segment.dist_per_tick;
            }
            consumer.advance();
        }
        assert!(first_rate_block2 > 0, "second block was prepared");
        // Rates on both sides of the junction must be close: the first
        // block's tail decelerates toward sqrt(200) mm/s and the second
        // accelerates away from it.
        let hi = last_rate_block1.max(first_rate_block2) as f32;
        let lo = last_rate_block1.min(first_rate_block2) as f32;
        assert!(
            hi / lo < 1.35,
            "junction rates diverge: {last_rate_block1} vs {first_rate_block2}"
        );
    }
}
