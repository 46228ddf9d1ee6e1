use std::fmt::{self, Display};

use callisto_mode::CalibrationMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    AwaitingHardwareReady,
    RunningMode {
        mode: CalibrationMode,
        step: ModeStep,
    },
    Finalizing,
}

/// Steps inside one mode, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeStep {
    SetRelay,
    Launch,
    StopCommand,
    OverviewCommand,
    WaitOverviewFile,
    Relaunch,
    FitsCommand,
    WaitFitsFile,
}

impl Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::AwaitingHardwareReady => f.write_str("awaiting hardware"),
            Self::RunningMode { mode, step } => write!(f, "{mode}: {step:?}"),
            Self::Finalizing => f.write_str("finalizing"),
        }
    }
}
