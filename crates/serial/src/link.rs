use std::io::{BufRead, BufReader, ErrorKind, Read, Write};

use tracing::{debug, trace};

use crate::{LinkError, SerialDeviceConfig};

pub trait Port: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Port for T {}

/// Something a [`SerialLink`] can be opened against.
pub trait Connector {
    fn name(&self) -> String;

    fn open(&self) -> Result<Box<dyn Port>, LinkError>;
}

impl Connector for SerialDeviceConfig {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> Result<Box<dyn Port>, LinkError> {
        let path = self.path.to_string_lossy();

        let port = serialport::new(path.as_ref(), self.baud_rate)
            .data_bits(self.data_bits.into())
            .parity(self.parity.into())
            .stop_bits(self.stop_bits.into())
            .flow_control(serialport::FlowControl::None)
            .timeout(self.timeout)
            .open()
            .map_err(|source| LinkError::DeviceUnavailable {
                path: path.clone().into_owned(),
                source,
            })?;

        Ok(Box::new(port))
    }
}

/// One request/response exchange with a serial device.
///
/// The device is released when the link is closed or dropped, whichever comes first.
pub struct SerialLink {
    name: String,
    reader: Option<BufReader<Box<dyn Port>>>,
}

impl SerialLink {
    pub fn open(connector: &impl Connector) -> Result<Self, LinkError> {
        let name = connector.name();
        let port = connector.open()?;

        trace!(%name, "serial link opened");

        Ok(Self {
            name,
            reader: Some(BufReader::new(port)),
        })
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, LinkError> {
        let port = self.reader.as_mut().ok_or(LinkError::Closed)?.get_mut();

        port.write_all(bytes)?;
        port.flush()?;

        debug!(name = %self.name, request = ?String::from_utf8_lossy(bytes), "wrote to serial link");

        Ok(bytes.len())
    }

    /// Reads one line, bounded by the read timeout the port was opened with.
    ///
    /// Whatever arrived before the timeout is returned even without a line break; only
    /// silence is a [`LinkError::Timeout`].
    pub fn read_response(&mut self) -> Result<String, LinkError> {
        let reader = self.reader.as_mut().ok_or(LinkError::Closed)?;

        let mut buffer = Vec::new();

        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => return Err(LinkError::Closed),
            Ok(_) => {}
            Err(error)
                if !buffer.is_empty()
                    && matches!(error.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) =>
            {
                trace!(name = %self.name, "read timed out mid-line, keeping partial response");
            }
            Err(error) => return Err(error.into()),
        }

        let response = String::from_utf8_lossy(&buffer).into_owned();

        debug!(name = %self.name, ?response, "read from serial link");

        Ok(response)
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            trace!(name = %self.name, "serial link closed");
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}
