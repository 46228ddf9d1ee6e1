use std::{
    fmt::{self, Display},
    io::{self, Write},
    net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream, UdpSocket},
    str::FromStr,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, trace, warn};

use super::{ControlError, ProcessHandle};
use crate::config::{CommandSet, InstrumentConfig};

/// Attempts are retried until this many per-attempt timeouts have elapsed.
const CONNECT_BUDGET_FACTOR: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentCommand {
    StartFits,
    StartOverview,
    Stop,
    Quit,
}

impl Display for InstrumentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StartFits => "start-fits",
            Self::StartOverview => "start-overview",
            Self::Stop => "stop",
            Self::Quit => "quit",
        })
    }
}

impl FromStr for InstrumentCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" | "fits" | "start-fits" => Ok(Self::StartFits),
            "overview" | "start-overview" => Ok(Self::StartOverview),
            "stop" => Ok(Self::Stop),
            "quit" => Ok(Self::Quit),
            other => Err(format!(
                "unknown instrument command `{other}`, expected start, overview, stop or quit"
            )),
        }
    }
}

/// Where the instrument listens for control commands, and the words it understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentEndpoint {
    pub address: SocketAddr,
    pub commands: CommandSet,
}

impl InstrumentEndpoint {
    pub fn resolve(config: &InstrumentConfig) -> Self {
        let host = config.host.unwrap_or_else(resolve_local_address);

        Self {
            address: SocketAddr::new(host, config.port),
            commands: config.commands.clone(),
        }
    }

    pub fn command(&self, command: InstrumentCommand) -> &str {
        match command {
            InstrumentCommand::StartFits => &self.commands.fits,
            InstrumentCommand::StartOverview => &self.commands.overview,
            InstrumentCommand::Stop => &self.commands.stop,
            InstrumentCommand::Quit => &self.commands.quit,
        }
    }
}

/// The address this machine would use to reach the outside world, or loopback when there
/// is no route.
pub fn resolve_local_address() -> IpAddr {
    let probe = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        // Never sent anything, connecting a datagram socket only picks a route
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(address) if !address.is_unspecified() => address,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(error) => {
            debug!(%error, "no outbound route, falling back to loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Line based TCP client for the instrument's control listener. Commands are
/// fire-and-forget, nothing is read back.
#[derive(Debug, Clone)]
pub struct InstrumentControlChannel {
    endpoint: InstrumentEndpoint,
    connect_timeout: Duration,
    retry_interval: Duration,
}

impl InstrumentControlChannel {
    pub fn new(
        endpoint: InstrumentEndpoint,
        connect_timeout: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            endpoint,
            connect_timeout,
            retry_interval,
        }
    }

    pub fn endpoint(&self) -> &InstrumentEndpoint {
        &self.endpoint
    }

    pub fn connect(&self) -> Result<TcpStream, ControlError> {
        let address = self.endpoint.address;
        let budget = self.connect_timeout * CONNECT_BUDGET_FACTOR;
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match TcpStream::connect_timeout(&address, self.connect_timeout) {
                Ok(stream) => {
                    trace!(%address, attempts, "connected to instrument");
                    return Ok(stream);
                }
                Err(error) if started.elapsed() + self.retry_interval >= budget => {
                    return Err(ControlError::Timeout {
                        address,
                        attempts,
                        source: error,
                    });
                }
                Err(error) => {
                    debug!(%address, attempts, %error, "instrument not accepting connections yet");
                    thread::sleep(self.retry_interval);
                }
            }
        }
    }

    /// Sends one command followed by a line break, then closes the connection.
    pub fn send(&self, command: InstrumentCommand) -> Result<(), ControlError> {
        let text = self.endpoint.command(command);
        let mut stream = self.connect()?;

        stream.write_all(format!("{text}\n").as_bytes())?;
        stream.flush()?;
        stream.shutdown(Shutdown::Write)?;

        match stream.shutdown(Shutdown::Both) {
            Err(error) if error.kind() != io::ErrorKind::NotConnected => return Err(error.into()),
            _ => {}
        }

        info!(%command, %text, address = %self.endpoint.address, "sent instrument command");

        Ok(())
    }

    /// Sends `command` to a running instrument. Nothing is sent when `running` is empty,
    /// and transport failures are only logged.
    pub fn send_command(&self, command: InstrumentCommand, running: &ProcessHandle) {
        if running.is_empty() {
            debug!(%command, "instrument not running, skipping command");
            return;
        }

        if let Err(error) = self.send(command) {
            warn!(%command, address = %self.endpoint.address, %error, "instrument command was not delivered");
        }
    }
}
