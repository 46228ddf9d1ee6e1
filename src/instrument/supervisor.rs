use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use callisto_mode::CalibrationMode;
use tracing::{debug, info, warn};

use super::{
    LaunchError, Launcher, ProcessHandle, ProcessTable, ServiceAction, ServiceControl,
    SpawnOutcome,
};
use crate::{config::InstrumentConfig, task::BackgroundTask};

const DEATH_POLL: Duration = Duration::from_millis(250);

/// Owns the lifecycle of the instrument binary, both as a host service and as a manually
/// launched process.
pub struct ProcessSupervisor<T, S, L> {
    binary_name: Arc<str>,
    table: Arc<T>,
    service: S,
    launcher: L,
    config: InstrumentConfig,
}

impl<T, S, L> ProcessSupervisor<T, S, L>
where
    T: ProcessTable + 'static,
    S: ServiceControl,
    L: Launcher,
{
    pub fn new(config: &InstrumentConfig, table: T, service: S, launcher: L) -> Self {
        Self {
            binary_name: Arc::from(config.binary_name.as_str()),
            table: Arc::new(table),
            service,
            launcher,
            config: config.clone(),
        }
    }

    pub fn list_running_instances(&self) -> ProcessHandle {
        self.table.instances(&self.binary_name)
    }

    pub fn start_service(&self) {
        self.service.request(ServiceAction::Start);
    }

    /// Asks the service manager to stop the instrument, then kills whatever instances are
    /// left until none remain or `stop_wait` runs out.
    ///
    /// The returned task yields the instances still alive when it gave up.
    pub fn stop_service(&self) -> BackgroundTask<ProcessHandle> {
        self.service.request(ServiceAction::Stop);

        let table = Arc::clone(&self.table);
        let name = Arc::clone(&self.binary_name);
        let deadline = Instant::now() + self.config.stop_wait;

        BackgroundTask::spawn("stray_killer", move || {
            let mut reported_denial = false;

            loop {
                let running = table.instances(&name);

                if running.is_empty() {
                    return running;
                }

                let termination = table.terminate(&name);

                debug!(%running, ?termination, "terminating stray instances");

                if termination.denied > 0 && !reported_denial {
                    warn!(
                        %running,
                        denied = termination.denied,
                        "could not kill all instrument instances, relying on the quit command instead"
                    );
                    reported_denial = true;
                }

                if Instant::now() >= deadline {
                    return table.instances(&name);
                }

                thread::sleep(DEATH_POLL.min(deadline.saturating_duration_since(Instant::now())));
            }
        })
    }

    /// [`Self::stop_service`], joined. Returns the instances that survived.
    pub fn stop(&self) -> ProcessHandle {
        let task = self.stop_service();

        match task.join_timeout(self.config.stop_wait + DEATH_POLL * 2) {
            Some(survivors) => {
                if !survivors.is_empty() {
                    warn!(%survivors, "instrument instances survived the stop");
                }
                survivors
            }
            None => self.list_running_instances(),
        }
    }

    pub fn mode_config_path(&self, mode: CalibrationMode) -> PathBuf {
        self.config.mode_config_path(mode)
    }

    /// Starts the instrument with the configuration for `mode`, after making sure no other
    /// instance is running.
    ///
    /// A wrong-device response is retried once after `relaunch_delay`.
    pub fn launch(&self, mode: CalibrationMode) -> Result<ProcessHandle, LaunchError> {
        self.stop();

        let config = self.mode_config_path(mode);

        debug!(%mode, config = %config.display(), "launching instrument");

        let mut outcome = self.launcher.spawn(&config)?;

        if let SpawnOutcome::WrongDevice { line } = &outcome {
            warn!(
                %mode,
                %line,
                delay = ?self.config.relaunch_delay,
                "instrument found the wrong device, retrying once"
            );

            thread::sleep(self.config.relaunch_delay);
            self.stop();

            outcome = self.launcher.spawn(&config)?;
        }

        match outcome {
            SpawnOutcome::Running { pid } => {
                info!(%mode, pid, "instrument running");
                Ok(ProcessHandle::new(vec![pid]))
            }
            SpawnOutcome::WrongDevice { line } => Err(LaunchError::WrongDevice { mode, line }),
            SpawnOutcome::Exited { status } => Err(LaunchError::Exited { mode, status }),
        }
    }
}
