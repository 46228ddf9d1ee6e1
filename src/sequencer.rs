//! Drives the relay, the instrument and the output watcher through a calibration run.
//!
//! A run waits for the calibration unit to identify itself, then visits each requested mode
//! in turn. Within a mode the relay is switched first, then an overview and a fits
//! measurement are taken, each on a freshly launched instrument. Whatever happens, the run
//! ends by handing the instrument back to its service and returning the relay to SKY.

use std::{
    thread,
    time::{Duration, Instant},
};

use callisto_mode::{CalibrationMode, Elapsed, MeasurementKind, MeasurementResult};
use callisto_serial::{CalibrationUnit, Connector, RelayOutcome};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    instrument::{
        Instrument, InstrumentCommand, LaunchError, Launcher, ProcessHandle, ProcessTable,
        ServiceControl,
    },
    watcher::{ArmedWatch, CompletionWatcher, WatchError, WatchOutcome, WatchSpec},
};

mod cancel;
mod report;
mod state;

pub use self::{
    cancel::CancelToken,
    report::{CalibrationReport, RunOutcome},
    state::{ModeStep, SequencerState},
};

pub trait RelayControl {
    fn verify_identity(&self) -> bool;

    fn set_relay(&self, mode: CalibrationMode) -> RelayOutcome;
}

impl<C: Connector> RelayControl for CalibrationUnit<C> {
    fn verify_identity(&self) -> bool {
        CalibrationUnit::verify_identity(self)
    }

    fn set_relay(&self, mode: CalibrationMode) -> RelayOutcome {
        CalibrationUnit::set_relay(self, mode)
    }
}

pub trait InstrumentControl {
    fn launch(&self, mode: CalibrationMode) -> Result<ProcessHandle, LaunchError>;

    fn send_command(&self, command: InstrumentCommand);

    fn stop(&self) -> ProcessHandle;

    fn start_service(&self);
}

impl<T, S, L> InstrumentControl for Instrument<T, S, L>
where
    T: ProcessTable + 'static,
    S: ServiceControl,
    L: Launcher,
{
    fn launch(&self, mode: CalibrationMode) -> Result<ProcessHandle, LaunchError> {
        Instrument::launch(self, mode)
    }

    fn send_command(&self, command: InstrumentCommand) {
        Instrument::send_command(self, command)
    }

    fn stop(&self) -> ProcessHandle {
        Instrument::stop(self)
    }

    fn start_service(&self) {
        Instrument::start_service(self)
    }
}

/// Output file detection, split so the watch is live before the instrument is asked for output.
pub trait ArtifactWatch {
    type Armed: PendingArtifact;

    fn arm(&self, spec: &WatchSpec) -> Result<Self::Armed, WatchError>;
}

pub trait PendingArtifact {
    fn wait(self) -> Result<WatchOutcome, WatchError>;
}

impl ArtifactWatch for CompletionWatcher {
    type Armed = ArmedWatch;

    fn arm(&self, spec: &WatchSpec) -> Result<ArmedWatch, WatchError> {
        CompletionWatcher::arm(self, spec)
    }
}

impl PendingArtifact for ArmedWatch {
    fn wait(self) -> Result<WatchOutcome, WatchError> {
        ArmedWatch::wait(self)
    }
}

/// Taken in every mode, in this order.
const MEASUREMENTS: [MeasurementKind; 2] = [MeasurementKind::Overview, MeasurementKind::Fits];

/// Conditions that end a run early.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("calibration unit did not identify itself after {attempts} attempts ({waited})")]
    HardwareUnresponsive { attempts: u32, waited: Elapsed },
    #[error("instrument in {mode} mode is connected to the wrong device: {line}")]
    WrongDevice { mode: CalibrationMode, line: String },
    #[error(transparent)]
    Launch(LaunchError),
    #[error("calibration was cancelled")]
    Cancelled,
}

impl From<LaunchError> for SequenceError {
    fn from(error: LaunchError) -> Self {
        match error {
            LaunchError::WrongDevice { mode, line } => SequenceError::WrongDevice { mode, line },
            error => SequenceError::Launch(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerSettings {
    pub overview: WatchSpec,
    pub fits: WatchSpec,
    pub ready_interval: Duration,
    pub ready_attempts: u32,
}

impl From<&Config> for SequencerSettings {
    fn from(config: &Config) -> Self {
        Self {
            overview: WatchSpec {
                directory: config.output.overview_dir.clone(),
                pattern: config.output.overview_pattern.clone(),
                timeout: config.timeouts.overview,
            },
            fits: WatchSpec {
                directory: config.output.data_dir.clone(),
                pattern: config.output.fits_pattern.clone(),
                timeout: config.timeouts.fits,
            },
            ready_interval: config.timeouts.ready_interval,
            ready_attempts: config.timeouts.ready_attempts,
        }
    }
}

pub struct CalibrationSequencer<R, I, W> {
    relay: R,
    instrument: I,
    watcher: W,
    settings: SequencerSettings,
    cancel: CancelToken,
    state: SequencerState,
    launched: bool,
}

impl<R, I, W> CalibrationSequencer<R, I, W>
where
    R: RelayControl,
    I: InstrumentControl,
    W: ArtifactWatch,
{
    pub fn new(relay: R, instrument: I, watcher: W, settings: SequencerSettings) -> Self {
        Self {
            relay,
            instrument,
            watcher,
            settings,
            cancel: CancelToken::default(),
            state: SequencerState::Idle,
            launched: false,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Full calibration: COLD, WARM, then HOT.
    pub fn run(&mut self) -> CalibrationReport {
        self.run_modes(&CalibrationMode::REFERENCES)
    }

    /// Calibration in a single mode.
    pub fn run_single(&mut self, mode: CalibrationMode) -> CalibrationReport {
        self.run_modes(&[mode])
    }

    /// One measurement with the instrument configured for `mode`. The relay is left alone.
    pub fn run_measurement(
        &mut self,
        mode: CalibrationMode,
        kind: MeasurementKind,
    ) -> CalibrationReport {
        let started = Instant::now();
        let mut measurements = Vec::new();

        let result = self
            .measure(mode, kind)
            .map(|measurement| measurements.push(measurement));

        self.finalize(false);

        self.conclude(vec![(mode, kind)], measurements, result, started)
    }

    fn run_modes(&mut self, modes: &[CalibrationMode]) -> CalibrationReport {
        let started = Instant::now();
        let mut measurements = Vec::new();

        let result = self.sequence(modes, &mut measurements);

        self.finalize(true);

        let planned = modes
            .iter()
            .flat_map(|&mode| MEASUREMENTS.map(|kind| (mode, kind)))
            .collect();

        self.conclude(planned, measurements, result, started)
    }

    fn sequence(
        &mut self,
        modes: &[CalibrationMode],
        measurements: &mut Vec<MeasurementResult>,
    ) -> Result<(), SequenceError> {
        self.await_hardware()?;

        for &mode in modes {
            self.check_cancelled()?;
            self.run_mode(mode, measurements)?;
        }

        Ok(())
    }

    fn conclude(
        &mut self,
        planned: Vec<(CalibrationMode, MeasurementKind)>,
        measurements: Vec<MeasurementResult>,
        result: Result<(), SequenceError>,
        started: Instant,
    ) -> CalibrationReport {
        let report = CalibrationReport {
            planned,
            measurements,
            outcome: match result {
                Ok(()) => RunOutcome::Completed,
                Err(SequenceError::Cancelled) => RunOutcome::Cancelled,
                Err(error) => RunOutcome::Aborted(error),
            },
            elapsed: started.elapsed().into(),
        };

        report.log();

        self.transition(SequencerState::Idle);

        report
    }

    fn await_hardware(&mut self) -> Result<(), SequenceError> {
        self.transition(SequencerState::AwaitingHardwareReady);

        let started = Instant::now();
        let attempts = self.settings.ready_attempts.max(1);

        for attempt in 1..=attempts {
            self.check_cancelled()?;

            if self.relay.verify_identity() {
                info!(attempt, "calibration unit ready");
                return Ok(());
            }

            debug!(attempt, attempts, "calibration unit not ready");

            if attempt < attempts {
                thread::sleep(self.settings.ready_interval);
            }
        }

        Err(SequenceError::HardwareUnresponsive {
            attempts,
            waited: started.elapsed().into(),
        })
    }

    fn run_mode(
        &mut self,
        mode: CalibrationMode,
        measurements: &mut Vec<MeasurementResult>,
    ) -> Result<(), SequenceError> {
        info!(%mode, "calibrating");

        self.step(mode, ModeStep::SetRelay);

        let relay = self.relay.set_relay(mode);
        if !relay.is_success() {
            warn!(%mode, ?relay, "relay not confirmed, measuring anyway");
        }

        for kind in MEASUREMENTS {
            self.check_cancelled()?;
            measurements.push(self.measure(mode, kind)?);
        }

        Ok(())
    }

    /// Launch, stop, request, wait, stop. A missing output file is recorded, not raised.
    fn measure(
        &mut self,
        mode: CalibrationMode,
        kind: MeasurementKind,
    ) -> Result<MeasurementResult, SequenceError> {
        let (launch, request, command, wait, spec) = match kind {
            MeasurementKind::Overview => (
                ModeStep::Launch,
                ModeStep::OverviewCommand,
                InstrumentCommand::StartOverview,
                ModeStep::WaitOverviewFile,
                self.settings.overview.clone(),
            ),
            MeasurementKind::Fits => (
                ModeStep::Relaunch,
                ModeStep::FitsCommand,
                InstrumentCommand::StartFits,
                ModeStep::WaitFitsFile,
                self.settings.fits.clone(),
            ),
        };

        self.step(mode, launch);
        self.launched = true;
        let handle = self.instrument.launch(mode)?;
        debug!(%mode, %kind, %handle, "instrument launched for measurement");

        self.step(mode, ModeStep::StopCommand);
        self.instrument.send_command(InstrumentCommand::Stop);

        self.step(mode, request);
        let armed = self.watcher.arm(&spec);
        self.instrument.send_command(command);

        self.step(mode, wait);
        let started = Instant::now();
        let outcome = armed.and_then(|armed| armed.wait());

        match &outcome {
            Ok(WatchOutcome::Found { path, elapsed }) => {
                info!(%mode, %kind, path = %path.display(), %elapsed, "measurement complete");
            }
            Ok(WatchOutcome::TimedOut { elapsed }) => {
                warn!(
                    %mode,
                    %kind,
                    %elapsed,
                    directory = %spec.directory.display(),
                    pattern = %spec.pattern,
                    "no output file appeared, continuing without it"
                );
            }
            Err(error) => {
                warn!(%mode, %kind, %error, "could not watch for output file, continuing without it");
            }
        }

        let (success, elapsed) = match outcome {
            Ok(outcome) => (outcome.is_found(), outcome.elapsed()),
            Err(_) => (false, started.elapsed().into()),
        };

        self.step(mode, ModeStep::StopCommand);
        self.instrument.send_command(InstrumentCommand::Stop);

        Ok(MeasurementResult {
            mode,
            kind,
            success,
            elapsed,
        })
    }

    /// Runs on every exit path. The instrument is only stopped if this run started it.
    fn finalize(&mut self, restore_relay: bool) {
        self.transition(SequencerState::Finalizing);

        if self.launched {
            self.instrument.send_command(InstrumentCommand::Stop);

            let survivors = self.instrument.stop();
            if !survivors.is_empty() {
                warn!(%survivors, "manually launched instrument is still running");
            }

            self.launched = false;
        }

        self.instrument.start_service();

        if restore_relay {
            let relay = self.relay.set_relay(CalibrationMode::Sky);
            if !relay.is_success() {
                warn!(?relay, "relay could not be returned to SKY");
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), SequenceError> {
        if self.cancel.is_cancelled() {
            Err(SequenceError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn step(&mut self, mode: CalibrationMode, step: ModeStep) {
        self.transition(SequencerState::RunningMode { mode, step });
    }

    fn transition(&mut self, state: SequencerState) {
        debug!(from = %self.state, to = %state, "sequencer state");
        self.state = state;
    }
}
