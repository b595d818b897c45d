//! Demo driver for the motion execution core.
//!
//! Runs canned motion programs against the virtual machine and reports
//! step counts, timing, and (optionally) a JSON pulse trace.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use motion_exec::{PlannerBlock, SegmentRing, StepperConfig};
use sim::Machine;
use tracing::info;

/// Host-side simulator for the motion execution core.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single straight move on the X axis.
    Line(MoveArgs),
    /// Run a closed square in XY (four junctioned moves).
    Square(MoveArgs),
}

#[derive(Parser, Debug)]
struct MoveArgs {
    /// Move length per side, in millimeters.
    #[arg(long, default_value_t = 20.0)]
    length_mm: f32,

    /// Feed rate, in mm/s.
    #[arg(long, default_value_t = 30.0)]
    feed: f32,

    /// Acceleration, in mm/s^2.
    #[arg(long, default_value_t = 500.0)]
    accel: f32,

    /// Axis resolution, in steps/mm.
    #[arg(long, default_value_t = 80.0)]
    steps_per_mm: f32,

    /// Write the recorded pulse trace to this JSON file.
    #[arg(long)]
    trace: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Line(args) => run(&args, line_blocks(&args)),
        Commands::Square(args) => run(&args, square_blocks(&args)),
    }
}

fn line_blocks(args: &MoveArgs) -> Vec<PlannerBlock> {
    let steps = (args.length_mm * args.steps_per_mm).round() as u32;
    vec![PlannerBlock::new(
        [steps, 0, 0],
        0,
        args.length_mm,
        0.0,
        args.feed * args.feed,
        args.accel,
    )]
}

fn square_blocks(args: &MoveArgs) -> Vec<PlannerBlock> {
    let steps = (args.length_mm * args.steps_per_mm).round() as u32;
    let nominal_sqr = args.feed * args.feed;
    // Square corners are full stops; a lookahead planner would carry
    // junction speed, which the straight-line demo exercises instead.
    let side = |axis: usize, negative: bool| {
        let mut axis_steps = [0u32; 3];
        axis_steps[axis] = steps;
        PlannerBlock::new(
            axis_steps,
            if negative { 1 << axis } else { 0 },
            args.length_mm,
            0.0,
            nominal_sqr,
            args.accel,
        )
    };
    vec![
        side(0, false),
        side(1, false),
        side(0, true),
        side(1, true),
    ]
}

fn run(args: &MoveArgs, blocks: Vec<PlannerBlock>) -> Result<()> {
    let mut ring = SegmentRing::new();
    let mut machine = Machine::new(&mut ring, StepperConfig::default());

    for block in blocks {
        machine.enqueue(block)?;
    }
    machine.cycle_start()?;
    let ticks = machine.run_until_stopped(100_000_000)?;

    let trace = machine.trace();
    info!(
        ticks,
        pulses = trace.pulses.len(),
        position = ?machine.position(),
        state = ?machine.state(),
        "run complete in {:.3} s",
        trace.duration_secs()
    );
    if let Some(gap) = trace.max_pulse_gap() {
        info!(max_pulse_gap_ticks = gap, "pulse spacing");
    }

    if let Some(path) = &args.trace {
        trace.dump(path)?;
    }
    Ok(())
}
