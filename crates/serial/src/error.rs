use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("serial device {path} is unavailable: {source}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial link timed out")]
    Timeout,
    #[error("serial link was closed")]
    Closed,
    #[error("serial link failed: {0}")]
    Io(io::Error),
}

impl From<io::Error> for LinkError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => LinkError::Timeout,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => LinkError::Closed,
            _ => LinkError::Io(error),
        }
    }
}

impl LinkError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::Timeout)
    }
}
