use std::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod elapsed;
pub mod measurement;

pub use self::{
    elapsed::Elapsed,
    measurement::{MeasurementKind, MeasurementResult},
};

/// Physical state of the calibration unit's relay.
///
/// `Sky` is the resting state, the other three switch a reference load in front of the
/// receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CalibrationMode {
    Sky,
    Cold,
    Warm,
    Hot,
}

impl CalibrationMode {
    pub const ALL: [Self; 4] = [Self::Sky, Self::Cold, Self::Warm, Self::Hot];

    /// Reference modes in the order a full calibration visits them.
    pub const REFERENCES: [Self; 3] = [Self::Cold, Self::Warm, Self::Hot];

    /// Serial command that switches the relay into this mode, line terminator included.
    pub const fn relay_command(self) -> &'static [u8] {
        match self {
            Self::Sky => b"Tsky\n",
            Self::Cold => b"Tcold\n",
            Self::Warm => b"Twarm\n",
            Self::Hot => b"Thot\n",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sky => "SKY",
            Self::Cold => "COLD",
            Self::Warm => "WARM",
            Self::Hot => "HOT",
        }
    }
}

impl Display for CalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown calibration mode `{0}`, expected one of SKY, COLD, WARM, HOT")]
pub struct UnknownMode(pub String);

impl FromStr for CalibrationMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownMode(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_commands_are_distinct_and_terminated() {
        let commands = CalibrationMode::ALL.map(CalibrationMode::relay_command);

        assert_eq!(commands[0], b"Tsky\n");
        assert_eq!(commands[1], b"Tcold\n");
        assert_eq!(commands[2], b"Twarm\n");
        assert_eq!(commands[3], b"Thot\n");

        for (i, a) in commands.iter().enumerate() {
            assert!(a.ends_with(b"\n"));

            for b in &commands[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("cold".parse(), Ok(CalibrationMode::Cold));
        assert_eq!(" HOT ".parse(), Ok(CalibrationMode::Hot));
        assert_eq!("Warm".parse(), Ok(CalibrationMode::Warm));
        assert_eq!("SKY".parse(), Ok(CalibrationMode::Sky));
    }

    #[test]
    fn rejects_unknown_modes() {
        assert_eq!(
            "LUKEWARM".parse::<CalibrationMode>(),
            Err(UnknownMode("LUKEWARM".into()))
        );
        assert!("".parse::<CalibrationMode>().is_err());
    }

    #[test]
    fn references_skip_sky() {
        assert_eq!(
            CalibrationMode::REFERENCES,
            [
                CalibrationMode::Cold,
                CalibrationMode::Warm,
                CalibrationMode::Hot
            ]
        );
    }
}
