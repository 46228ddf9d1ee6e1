//! The spectrometer binary: its process lifecycle and its TCP control listener.

use callisto_mode::CalibrationMode;

use crate::config::InstrumentConfig;

mod control;
mod error;
mod launcher;
mod process;
mod service;
mod supervisor;

pub use self::{
    control::{InstrumentCommand, InstrumentControlChannel, InstrumentEndpoint},
    error::{ControlError, LaunchError},
    launcher::{CommandLauncher, Launcher, SpawnOutcome},
    process::{ProcessHandle, ProcessTable, SysinfoTable},
    service::{ServiceAction, ServiceControl, ServiceManager},
    supervisor::ProcessSupervisor,
};

/// Supervisor and control channel of one instrument, used together.
pub struct Instrument<T = SysinfoTable, S = ServiceManager, L = CommandLauncher> {
    supervisor: ProcessSupervisor<T, S, L>,
    channel: InstrumentControlChannel,
}

impl Instrument {
    pub fn from_config(config: &InstrumentConfig) -> Self {
        let supervisor = ProcessSupervisor::new(
            config,
            SysinfoTable,
            ServiceManager::new(config.service_manager.clone(), config.service.clone()),
            CommandLauncher::new(
                config.executable.clone(),
                config.wrong_device_marker.clone(),
                config.launch_grace,
            ),
        );

        let channel = InstrumentControlChannel::new(
            InstrumentEndpoint::resolve(config),
            config.connect_timeout,
            config.connect_retry_interval,
        );

        Self::new(supervisor, channel)
    }
}

impl<T, S, L> Instrument<T, S, L>
where
    T: ProcessTable + 'static,
    S: ServiceControl,
    L: Launcher,
{
    pub fn new(supervisor: ProcessSupervisor<T, S, L>, channel: InstrumentControlChannel) -> Self {
        Self {
            supervisor,
            channel,
        }
    }

    pub fn endpoint(&self) -> &InstrumentEndpoint {
        self.channel.endpoint()
    }

    pub fn running(&self) -> ProcessHandle {
        self.supervisor.list_running_instances()
    }

    /// Skipped when the instrument is not running.
    pub fn send_command(&self, command: InstrumentCommand) {
        self.channel.send_command(command, &self.running());
    }

    /// Politely quits whatever instance is listening, then hands over to the supervisor,
    /// which forces a clean slate before starting `mode`.
    pub fn launch(&self, mode: CalibrationMode) -> Result<ProcessHandle, LaunchError> {
        self.send_command(InstrumentCommand::Quit);
        self.supervisor.launch(mode)
    }

    pub fn stop(&self) -> ProcessHandle {
        self.supervisor.stop()
    }

    pub fn start_service(&self) {
        self.supervisor.start_service()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Read,
        net::TcpListener,
        thread,
        time::Duration,
    };

    use parking_lot::Mutex;

    use super::{
        supervisor::tests::{FakeLauncher, FakeService, FakeTable},
        *,
    };
    use crate::config::CommandSet;

    fn instrument(
        table: FakeTable,
        address: std::net::SocketAddr,
    ) -> Instrument<FakeTable, FakeService, FakeLauncher> {
        let config = InstrumentConfig {
            stop_wait: Duration::from_millis(100),
            ..InstrumentConfig::default()
        };

        Instrument::new(
            ProcessSupervisor::new(&config, table, FakeService::default(), FakeLauncher::default()),
            InstrumentControlChannel::new(
                InstrumentEndpoint {
                    address,
                    commands: CommandSet::default(),
                },
                Duration::from_millis(50),
                Duration::from_millis(10),
            ),
        )
    }

    #[test]
    fn launch_quits_a_running_instance_first() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let received = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut text = String::new();
            stream.read_to_string(&mut text).unwrap();
            text
        });

        let table = FakeTable {
            running: Mutex::new(vec![7]),
            ..FakeTable::default()
        };
        let instrument = instrument(table, address);

        let handle = instrument.launch(CalibrationMode::Hot).unwrap();

        assert_eq!(received.join().unwrap(), "quit\n");
        assert_eq!(handle.pids(), &[4242]);
    }

    #[test]
    fn commands_to_a_stopped_instrument_are_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let instrument = instrument(FakeTable::default(), listener.local_addr().unwrap());

        instrument.send_command(InstrumentCommand::Stop);

        assert!(instrument.running().is_empty());
        assert!(listener.accept().is_err());
    }
}
