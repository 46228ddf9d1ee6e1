use std::fmt::{self, Display};

use crate::{CalibrationMode, Elapsed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    /// Fast, low resolution scan written as a `.PRN` file.
    Overview,
    /// Full resolution acquisition written as a `.fit` file.
    Fits,
}

impl Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overview => "overview",
            Self::Fits => "fits",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementResult {
    pub mode: CalibrationMode,
    pub kind: MeasurementKind,
    pub success: bool,
    pub elapsed: Elapsed,
}

impl Display for MeasurementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} after {}",
            self.mode,
            self.kind,
            if self.success { "complete" } else { "INCOMPLETE" },
            self.elapsed
        )
    }
}
