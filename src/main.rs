use std::path::PathBuf;

use argh::FromArgs;
use callisto_mode::{CalibrationMode, MeasurementKind};
use callisto_serial::CalibrationUnit;
use git_version::git_version;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    instrument::{Instrument, InstrumentCommand},
    sequencer::{CalibrationSequencer, SequencerSettings},
    watcher::CompletionWatcher,
};

mod canceller;
mod config;
mod instrument;
mod sequencer;
mod task;
mod watcher;

const VERSION: &str = git_version!(args = ["--always", "--dirty=-modified"], fallback = "unknown");

/// Calibration controller for the Callisto spectrometer and its relay calibration unit
#[derive(FromArgs, Debug)]
struct Args {
    /// configuration file, built-in defaults are used when omitted
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Command {
    Calibrate(CalibrateArgs),
    Single(SingleArgs),
    Overview(OverviewArgs),
    Fits(FitsArgs),
    Relay(RelayArgs),
    Check(CheckArgs),
    Status(StatusArgs),
    Stop(StopArgs),
    ServiceStart(ServiceStartArgs),
    Send(SendArgs),
}

/// calibrate in COLD, WARM and HOT, then return to SKY
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "calibrate")]
struct CalibrateArgs {}

/// calibrate in a single mode, then return to SKY
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "single")]
struct SingleArgs {
    /// SKY, COLD, WARM or HOT
    #[argh(positional)]
    mode: CalibrationMode,
}

/// record one overview with the configuration of a mode, without touching the relay
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "overview")]
struct OverviewArgs {
    /// SKY, COLD, WARM or HOT
    #[argh(positional)]
    mode: CalibrationMode,
}

/// record one fits file with the configuration of a mode, without touching the relay
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "fits")]
struct FitsArgs {
    /// SKY, COLD, WARM or HOT
    #[argh(positional)]
    mode: CalibrationMode,
}

/// switch the calibration unit relay
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "relay")]
struct RelayArgs {
    /// SKY, COLD, WARM or HOT
    #[argh(positional)]
    mode: CalibrationMode,
}

/// ask the calibration unit to identify itself
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "check")]
struct CheckArgs {}

/// list running instrument processes
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "status")]
struct StatusArgs {}

/// stop the instrument service and kill stray instances
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "stop")]
struct StopArgs {}

/// start the instrument service
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "service-start")]
struct ServiceStartArgs {}

/// send one control command (start, overview, stop or quit) to the running instrument
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "send")]
struct SendArgs {
    /// start, overview, stop or quit
    #[argh(positional)]
    command: InstrumentCommand,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Args = argh::from_env();

    info!(version = VERSION, ?args, "callisto calibrator");

    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Calibrate(CalibrateArgs {}) => {
            sequencer(&config).run();
        }
        Command::Single(SingleArgs { mode }) => {
            sequencer(&config).run_single(mode);
        }
        Command::Overview(OverviewArgs { mode }) => {
            sequencer(&config).run_measurement(mode, MeasurementKind::Overview);
        }
        Command::Fits(FitsArgs { mode }) => {
            sequencer(&config).run_measurement(mode, MeasurementKind::Fits);
        }
        Command::Relay(RelayArgs { mode }) => {
            let outcome = CalibrationUnit::new(config.calibration_unit).set_relay(mode);
            info!(%mode, ?outcome, "relay command finished");
        }
        Command::Check(CheckArgs {}) => {
            let unit = CalibrationUnit::new(config.calibration_unit);

            if unit.verify_identity() {
                info!(device = %unit.device(), "calibration unit ready");
            } else {
                warn!(device = %unit.device(), "calibration unit not ready");
            }
        }
        Command::Status(StatusArgs {}) => {
            let instrument = Instrument::from_config(&config.instrument);
            let running = instrument.running();

            if running.is_empty() {
                info!(binary = %config.instrument.binary_name, "instrument not running");
            } else {
                info!(binary = %config.instrument.binary_name, %running, "instrument running");
            }
        }
        Command::Stop(StopArgs {}) => {
            let survivors = Instrument::from_config(&config.instrument).stop();
            info!(%survivors, "instrument stopped");
        }
        Command::ServiceStart(ServiceStartArgs {}) => {
            Instrument::from_config(&config.instrument).start_service();
        }
        Command::Send(SendArgs { command }) => {
            Instrument::from_config(&config.instrument).send_command(command);
        }
    }

    Ok(())
}

fn sequencer(
    config: &Config,
) -> CalibrationSequencer<CalibrationUnit, Instrument, CompletionWatcher> {
    let instrument = Instrument::from_config(&config.instrument);

    info!(
        endpoint = %instrument.endpoint().address,
        device = %config.calibration_unit.path.display(),
        "calibration sequencer ready"
    );

    let sequencer = CalibrationSequencer::new(
        CalibrationUnit::new(config.calibration_unit.clone()),
        instrument,
        CompletionWatcher,
        SequencerSettings::from(config),
    );

    if let Some(address) = config.cancel_listener {
        canceller::spawn(address, sequencer.cancel_token());
    }

    sequencer
}
