use std::{
    fmt::{self, Display},
    process::{Command, Stdio},
};

use tracing::{debug, info, warn};

use crate::task::BackgroundTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
}

impl Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
        })
    }
}

/// Host service manager. Requests are fire-and-forget.
pub trait ServiceControl: Send + Sync {
    fn request(&self, action: ServiceAction);
}

/// Runs `<manager...> <action> <service>`, e.g. `sudo /bin/systemctl stop callisto.service`.
#[derive(Debug, Clone)]
pub struct ServiceManager {
    manager: Vec<String>,
    service: String,
}

impl ServiceManager {
    pub fn new(manager: Vec<String>, service: impl Into<String>) -> Self {
        Self {
            manager,
            service: service.into(),
        }
    }
}

impl ServiceControl for ServiceManager {
    fn request(&self, action: ServiceAction) {
        let Some((program, args)) = self.manager.split_first() else {
            warn!(%action, service = %self.service, "no service manager configured");
            return;
        };

        let child = Command::new(program)
            .args(args)
            .arg(action.to_string())
            .arg(&self.service)
            .stdin(Stdio::null())
            .spawn();

        match child {
            Ok(mut child) => {
                info!(%action, service = %self.service, "requested service {action}");

                let service = self.service.clone();

                // Reaped in the background, nobody waits on the result
                BackgroundTask::spawn(format!("service_{action}"), move || {
                    match child.wait() {
                        Ok(status) if status.success() => {
                            debug!(%action, %service, "service manager finished")
                        }
                        Ok(status) => {
                            warn!(%action, %service, %status, "service manager reported failure")
                        }
                        Err(error) => {
                            warn!(%action, %service, %error, "lost track of service manager")
                        }
                    }
                });
            }
            Err(error) => {
                warn!(%action, service = %self.service, %program, %error, "failed to run service manager");
            }
        }
    }
}
