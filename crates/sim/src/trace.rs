//! Motion trace capture and JSON dumping, for offline analysis of step
//! timing and CI validation.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use motion_exec::{StepperConfig, ISR_RATE};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::hal::{PulseRecord, VirtualHal};

/// A recorded run: configuration, every step pulse, and the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionTrace {
    pub isr_rate: u32,
    pub config: StepperConfig,
    /// Total virtual ticks elapsed.
    pub ticks: u64,
    pub final_position: [i32; 3],
    pub pulses: Vec<PulseRecord>,
}

impl MotionTrace {
    pub fn capture(cfg: &StepperConfig, hal: &VirtualHal, position: [i32; 3]) -> Self {
        Self {
            isr_rate: ISR_RATE,
            config: *cfg,
            ticks: hal.now,
            final_position: position,
            pulses: hal.pulses.clone(),
        }
    }

    /// Wall-clock duration of the recorded motion, in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.ticks as f64 / f64::from(self.isr_rate)
    }

    /// Largest gap between consecutive pulses, in ticks.
    pub fn max_pulse_gap(&self) -> Option<u64> {
        self.pulses
            .windows(2)
            .map(|pair| pair[1].tick - pair[0].tick)
            .max()
    }

    /// Dumps the trace as pretty JSON.
    pub fn dump(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), pulses = self.pulses.len(), "dumping motion trace");
        let mut file = File::create(path)?;
        let json = serde_json::to_string_pretty(self)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
