use callisto_mode::{CalibrationMode, Elapsed, MeasurementKind, MeasurementResult};
use tracing::{error, info, warn};

use super::SequenceError;

#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Aborted(SequenceError),
}

/// Everything a calibration run measured, and how it ended.
#[derive(Debug)]
pub struct CalibrationReport {
    /// Every measurement the run set out to take, in order.
    pub planned: Vec<(CalibrationMode, MeasurementKind)>,
    pub measurements: Vec<MeasurementResult>,
    pub outcome: RunOutcome,
    pub elapsed: Elapsed,
}

impl CalibrationReport {
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed) && self.incomplete().is_empty()
    }

    /// Planned measurements without an output file, either because none appeared or because
    /// the run ended before getting to them.
    pub fn incomplete(&self) -> Vec<(CalibrationMode, MeasurementKind)> {
        self.planned
            .iter()
            .copied()
            .filter(|&(mode, kind)| {
                !self
                    .measurements
                    .iter()
                    .any(|result| result.mode == mode && result.kind == kind && result.success)
            })
            .collect()
    }

    /// Planned measurements the run never started.
    pub fn unattempted(&self) -> impl Iterator<Item = (CalibrationMode, MeasurementKind)> + '_ {
        self.planned.iter().copied().filter(|&(mode, kind)| {
            !self
                .measurements
                .iter()
                .any(|result| result.mode == mode && result.kind == kind)
        })
    }

    pub fn log(&self) {
        for result in &self.measurements {
            if result.success {
                info!(%result, "measurement");
            } else {
                warn!(%result, "measurement");
            }
        }

        for (mode, kind) in self.unattempted() {
            warn!(%mode, %kind, "measurement not attempted");
        }

        match &self.outcome {
            RunOutcome::Completed if self.is_complete() => {
                info!(elapsed = %self.elapsed, "calibration complete")
            }
            RunOutcome::Completed => warn!(
                elapsed = %self.elapsed,
                incomplete = self.incomplete().len(),
                "calibration finished with incomplete measurements"
            ),
            RunOutcome::Cancelled => warn!(
                elapsed = %self.elapsed,
                incomplete = self.incomplete().len(),
                "calibration cancelled"
            ),
            RunOutcome::Aborted(reason) => error!(
                elapsed = %self.elapsed,
                incomplete = self.incomplete().len(),
                %reason,
                "calibration aborted"
            ),
        }
    }
}
