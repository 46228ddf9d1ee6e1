//! Serial side of the calibration unit: a short-lived request/response link and the
//! relay box protocol spoken over it.

mod config;
mod error;
mod link;
mod unit;

pub use self::{
    config::{DataBits, Parity, SerialDeviceConfig, StopBits},
    error::LinkError,
    link::{Connector, Port, SerialLink},
    unit::{CalibrationUnit, RelayOutcome},
};

#[cfg(test)]
pub(crate) mod fake;
