use std::{
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use super::LaunchError;
use crate::task::BackgroundTask;

const OUTPUT_POLL: Duration = Duration::from_millis(100);

/// How a freshly started instrument behaved during its grace period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnOutcome {
    Running { pid: u32 },
    /// The instrument printed the wrong-device marker and was killed.
    WrongDevice { line: String },
    Exited { status: String },
}

pub trait Launcher: Send + Sync {
    fn spawn(&self, config: &Path) -> Result<SpawnOutcome, LaunchError>;
}

/// Starts `<executable> --config <config>` as a background process.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    executable: PathBuf,
    wrong_device_marker: String,
    grace: Duration,
}

impl CommandLauncher {
    pub fn new(executable: PathBuf, wrong_device_marker: String, grace: Duration) -> Self {
        Self {
            executable,
            wrong_device_marker,
            grace,
        }
    }

    fn is_wrong_device(&self, line: &str) -> bool {
        !self.wrong_device_marker.is_empty()
            && line
                .to_ascii_lowercase()
                .contains(&self.wrong_device_marker.to_ascii_lowercase())
    }

    fn wrong_device(&self, child: &mut Child, line: String) -> SpawnOutcome {
        warn!(pid = child.id(), %line, "instrument reported the wrong device");

        let _ = child.kill();
        let _ = child.wait();

        SpawnOutcome::WrongDevice { line }
    }
}

impl Launcher for CommandLauncher {
    fn spawn(&self, config: &Path) -> Result<SpawnOutcome, LaunchError> {
        let mut child = Command::new(&self.executable)
            .arg("--config")
            .arg(config)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                executable: self.executable.clone(),
                source,
            })?;

        let pid = child.id();

        info!(pid, executable = %self.executable.display(), config = %config.display(), "instrument launched");

        let line_rx = {
            let (line_tx, line_rx) = channel();

            if let Some(stdout) = child.stdout.take() {
                forward_output(pid, "stdout", stdout, line_tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                forward_output(pid, "stderr", stderr, line_tx);
            }

            line_rx
        };

        let deadline = Instant::now() + self.grace;

        while Instant::now() < deadline {
            if let Some(line) = next_line(&line_rx, deadline) {
                if self.is_wrong_device(&line) {
                    return Ok(self.wrong_device(&mut child, line));
                }
            }

            if let Some(status) = child.try_wait()? {
                // Whatever was printed just before exiting may still be in flight
                while let Ok(line) = line_rx.recv_timeout(OUTPUT_POLL) {
                    if self.is_wrong_device(&line) {
                        return Ok(SpawnOutcome::WrongDevice { line });
                    }
                }

                return Ok(SpawnOutcome::Exited {
                    status: status.to_string(),
                });
            }
        }

        BackgroundTask::spawn(format!("reaper_{pid}"), move || match child.wait() {
            Ok(status) => debug!(pid, %status, "instrument exited"),
            Err(error) => warn!(pid, %error, "lost track of instrument"),
        });

        Ok(SpawnOutcome::Running { pid })
    }
}

fn next_line(line_rx: &Receiver<String>, deadline: Instant) -> Option<String> {
    let wait = deadline
        .saturating_duration_since(Instant::now())
        .min(OUTPUT_POLL);

    match line_rx.recv_timeout(wait) {
        Ok(line) => Some(line),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => {
            // Both streams closed, nothing left to listen to
            thread::sleep(wait);
            None
        }
    }
}

/// Logs every line the instrument prints, and hands it to whoever is still listening.
fn forward_output(
    pid: u32,
    stream: &'static str,
    output: impl Read + Send + 'static,
    line_tx: Sender<String>,
) {
    thread::Builder::new()
        .name(format!("instrument_{stream}"))
        .spawn(move || {
            for line in BufReader::new(output).lines() {
                match line {
                    Ok(line) => {
                        debug!(pid, stream, %line, "instrument output");

                        let _ = line_tx.send(line);
                    }
                    Err(error) => {
                        debug!(pid, stream, %error, "instrument output closed");
                        break;
                    }
                }
            }
        })
        .expect("failed to spawn instrument output thread");
}

#[cfg(all(test, unix))]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt};

    use super::*;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-instrument");

        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        path
    }

    fn launcher(executable: PathBuf) -> CommandLauncher {
        CommandLauncher::new(
            executable,
            "wrong device".into(),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn long_running_instrument_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(script(dir.path(), "echo listening; sleep 5"));

        match launcher.spawn(Path::new("/etc/callisto/callisto_HOT.cfg")).unwrap() {
            SpawnOutcome::Running { pid } => {
                let _ = Command::new("kill").arg(pid.to_string()).status();
            }
            outcome => panic!("unexpected outcome {outcome:?}"),
        }
    }

    #[test]
    fn marker_in_output_means_wrong_device() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(script(
            dir.path(),
            "echo 'ERROR: Wrong device on /dev/ttyUSB0' >&2; sleep 5",
        ));

        assert_eq!(
            launcher.spawn(Path::new("callisto_COLD.cfg")).unwrap(),
            SpawnOutcome::WrongDevice {
                line: "ERROR: Wrong device on /dev/ttyUSB0".into()
            }
        );
    }

    #[test]
    fn early_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(script(dir.path(), "exit 3"));

        assert!(matches!(
            launcher.spawn(Path::new("callisto_SKY.cfg")).unwrap(),
            SpawnOutcome::Exited { .. }
        ));
    }

    #[test]
    fn config_path_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("args");
        let launcher = launcher(script(
            dir.path(),
            &format!("echo \"$@\" > {}", log.display()),
        ));

        launcher.spawn(Path::new("/etc/callisto/callisto_WARM.cfg")).unwrap();

        assert_eq!(
            fs::read_to_string(log).unwrap().trim(),
            "--config /etc/callisto/callisto_WARM.cfg"
        );
    }

    #[test]
    fn missing_executable_fails_to_spawn() {
        let launcher = launcher(PathBuf::from("/nonexistent/callisto"));

        assert!(matches!(
            launcher.spawn(Path::new("callisto_SKY.cfg")),
            Err(LaunchError::Spawn { .. })
        ));
    }
}
