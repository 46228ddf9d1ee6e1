use std::{io, net::SocketAddr, path::PathBuf};

use callisto_mode::CalibrationMode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to start {}: {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("instrument launched in {mode} mode is connected to the wrong device: {line}")]
    WrongDevice { mode: CalibrationMode, line: String },
    #[error("instrument launched in {mode} mode exited immediately with {status}")]
    Exited {
        mode: CalibrationMode,
        status: String,
    },
    #[error("lost track of launched instrument: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no control listener at {address} after {attempts} attempts: {source}")]
    Timeout {
        address: SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("control connection failed: {0}")]
    Io(#[from] io::Error),
}
