use criterion::{black_box, criterion_group, criterion_main, Criterion};
use motion_exec::{
    BlockIndex, PlannerBlock, PlannerQueue, SegmentPreparer, SegmentRing, StepExecutor,
    StepperConfig, SystemState,
};
use step_port::mock::RecordingHal;

struct OneBlockPlanner {
    block: Option<PlannerBlock>,
}

impl PlannerQueue for OneBlockPlanner {
    fn block(&self, index: BlockIndex) -> Option<PlannerBlock> {
        if index == 0 {
            self.block
        } else {
            None
        }
    }

    fn next_index(&self, index: BlockIndex) -> BlockIndex {
        index.wrapping_add(1)
    }

    fn current_block(&self) -> Option<PlannerBlock> {
        self.block
    }

    fn discard_current_block(&mut self) {
        self.block = None;
    }
}

fn trapezoid() -> PlannerBlock {
    PlannerBlock::new([4000, 2000, 0], 0, 50.0, 0.0, 2500.0, 500.0)
}

fn benchmark_preparer(c: &mut Criterion) {
    c.bench_function("prepare_trapezoid_segments", |b| {
        b.iter(|| {
            let mut ring = SegmentRing::new();
            let (producer, mut consumer) = ring.split();
            let mut prep = SegmentPreparer::new(producer);
            let mut sys = SystemState::new();
            sys.queue();
            sys.start_cycle().unwrap();
            let planner = OneBlockPlanner {
                block: Some(black_box(trapezoid())),
            };
            // Slice the whole block, draining the ring as we go.
            let mut total = 0u32;
            loop {
                prep.prepare(&mut sys, &planner);
                let Some(segment) = consumer.current() else {
                    break;
                };
                total += u32::from(segment.n_step);
                let end = segment.is_end_of_block();
                consumer.advance();
                if end {
                    break;
                }
            }
            black_box(total)
        })
    });
}

fn benchmark_tick(c: &mut Criterion) {
    c.bench_function("executor_tick_throughput", |b| {
        b.iter(|| {
            let mut ring = SegmentRing::new();
            let (producer, consumer) = ring.split();
            let mut prep = SegmentPreparer::new(producer);
            let mut exec = StepExecutor::new(consumer, StepperConfig::default());
            let mut sys = SystemState::new();
            sys.queue();
            sys.start_cycle().unwrap();
            let mut planner = OneBlockPlanner {
                block: Some(black_box(trapezoid())),
            };
            let mut hal = RecordingHal::new();
            prep.prepare(&mut sys, &planner);
            exec.wake_up(&mut hal);
            for _ in 0..50_000 {
                exec.tick(&mut sys, &mut planner, &mut hal);
                if hal.armed_pulse.take().is_some() {
                    exec.pulse_end(&mut hal);
                }
                prep.prepare(&mut sys, &planner);
                if !hal.running {
                    break;
                }
            }
            black_box(exec.position())
        })
    });
}

criterion_group!(benches, benchmark_preparer, benchmark_tick);
criterion_main!(benches);
