//! Waiting for the instrument to drop its output files.

use std::{
    path::{Path, PathBuf},
    sync::mpsc::{channel, Receiver, RecvTimeoutError},
    time::{Duration, Instant},
};

use callisto_mode::Elapsed;
use notify::{
    event::{CreateKind, ModifyKind, RenameMode},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tracing::{debug, trace};

/// One wait for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
    pub directory: PathBuf,
    /// File name pattern, `*` matches any run of characters and `?` any single one.
    pub pattern: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Found { path: PathBuf, elapsed: Elapsed },
    TimedOut { elapsed: Elapsed },
}

impl WatchOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, WatchOutcome::Found { .. })
    }

    pub fn elapsed(&self) -> Elapsed {
        match self {
            WatchOutcome::Found { elapsed, .. } | WatchOutcome::TimedOut { elapsed } => *elapsed,
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot watch {}: {source}", directory.display())]
    Watch {
        directory: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("file watcher for {} stopped unexpectedly", directory.display())]
    Disconnected { directory: PathBuf },
}

/// Watches for a file matching a [`WatchSpec`] to show up, or its timeout to run out.
///
/// Only files that appear after the watch was armed count; older output is ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompletionWatcher;

impl CompletionWatcher {
    /// Starts collecting file events right away. Arm before asking the instrument for output,
    /// so a file written the moment the request lands is not missed.
    pub fn arm(&self, spec: &WatchSpec) -> Result<ArmedWatch, WatchError> {
        let watch_error = |source| WatchError::Watch {
            directory: spec.directory.clone(),
            source,
        };

        let armed_at = Instant::now();

        let (event_tx, event_rx) = channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(event_tx).map_err(watch_error)?;

        watcher
            .watch(&spec.directory, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        debug!(directory = %spec.directory.display(), pattern = %spec.pattern, timeout = ?spec.timeout, "watching for file");

        Ok(ArmedWatch {
            spec: spec.clone(),
            _watcher: watcher,
            event_rx,
            armed_at,
        })
    }
}

/// A watch that is already collecting events. The timeout runs from the moment it was armed.
pub struct ArmedWatch {
    spec: WatchSpec,
    _watcher: RecommendedWatcher,
    event_rx: Receiver<notify::Result<Event>>,
    armed_at: Instant,
}

impl ArmedWatch {
    pub fn wait(self) -> Result<WatchOutcome, WatchError> {
        let spec = &self.spec;
        let deadline = self.armed_at + spec.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());

            if remaining.is_zero() {
                return Ok(WatchOutcome::TimedOut {
                    elapsed: self.armed_at.elapsed().into(),
                });
            }

            match self.event_rx.recv_timeout(remaining) {
                Ok(Ok(event)) => {
                    trace!(?event, "file event");

                    if !is_arrival(&event.kind) {
                        continue;
                    }

                    if let Some(path) = event
                        .paths
                        .into_iter()
                        .find(|path| file_matches(path, &spec.pattern))
                    {
                        return Ok(WatchOutcome::Found {
                            path,
                            elapsed: self.armed_at.elapsed().into(),
                        });
                    }
                }
                Ok(Err(error)) => debug!(%error, "file watcher error"),
                // Checked against the deadline on the next turn
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WatchError::Disconnected {
                        directory: spec.directory.clone(),
                    })
                }
            }
        }
    }
}

fn is_arrival(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any))
    )
}

fn file_matches(path: &Path, pattern: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| wildcard_match(pattern.as_bytes(), name.as_bytes()))
}

fn wildcard_match(pattern: &[u8], name: &[u8]) -> bool {
    match (pattern.split_first(), name.split_first()) {
        (None, None) => true,
        (Some((&b'*', rest)), _) => {
            wildcard_match(rest, name) || (!name.is_empty() && wildcard_match(pattern, &name[1..]))
        }
        (Some((&b'?', rest)), Some((_, name))) => wildcard_match(rest, name),
        (Some((p, rest)), Some((n, name))) if p == n => wildcard_match(rest, name),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, thread};

    use super::*;

    fn spec(directory: &Path, pattern: &str, timeout: Duration) -> WatchSpec {
        WatchSpec {
            directory: directory.to_owned(),
            pattern: pattern.into(),
            timeout,
        }
    }

    fn watch(spec: &WatchSpec) -> Result<WatchOutcome, WatchError> {
        CompletionWatcher.arm(spec)?.wait()
    }

    #[test]
    fn wildcards() {
        assert!(wildcard_match(b"*.PRN", b"OVS_GLASGOW_20221003_120000.PRN"));
        assert!(wildcard_match(b"*.fit", b"GLASGOW_20221003_120000_59.fit"));
        assert!(wildcard_match(b"*", b""));
        assert!(wildcard_match(b"a?c", b"abc"));
        assert!(!wildcard_match(b"*.PRN", b"overview.prn"));
        assert!(!wildcard_match(b"*.fit", b"data.fit.tmp"));
        assert!(!wildcard_match(b"a?c", b"ac"));
    }

    #[test]
    fn finds_file_created_before_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("OVS_20221003.PRN");
        let timeout = Duration::from_secs(10);

        let writer = thread::spawn({
            let path = path.clone();
            move || {
                thread::sleep(Duration::from_millis(200));
                fs::write(path, "overview").unwrap();
            }
        });

        let outcome = watch(&spec(dir.path(), "*.PRN", timeout)).unwrap();

        writer.join().unwrap();

        match outcome {
            WatchOutcome::Found { path: found, elapsed } => {
                assert_eq!(found.file_name(), path.file_name());
                assert!(elapsed.duration() < timeout);
            }
            outcome => panic!("unexpected outcome {outcome:?}"),
        }
    }

    #[test]
    fn times_out_no_earlier_than_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let timeout = Duration::from_millis(300);

        let started = Instant::now();
        let outcome = watch(&spec(dir.path(), "*.fit", timeout)).unwrap();

        assert!(!outcome.is_found());
        assert!(outcome.elapsed().duration() >= timeout);
        assert!(started.elapsed() >= timeout);
    }

    #[test]
    fn ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();

        let writer = thread::spawn({
            let dir = dir.path().to_owned();
            move || {
                thread::sleep(Duration::from_millis(100));
                fs::write(dir.join("notes.txt"), "not a fits file").unwrap();
            }
        });

        let outcome = watch(&spec(dir.path(), "*.fit", Duration::from_millis(500))).unwrap();

        writer.join().unwrap();

        assert!(matches!(outcome, WatchOutcome::TimedOut { .. }));
    }

    #[test]
    fn file_written_right_after_arming_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let armed = CompletionWatcher
            .arm(&spec(dir.path(), "*.PRN", Duration::from_secs(10))).unwrap();

        fs::write(dir.path().join("OVS_fast.PRN"), "overview").unwrap();

        let outcome = armed.wait().unwrap();

        assert!(outcome.is_found());
        assert!(outcome.elapsed().duration() < Duration::from_secs(10));
    }

    #[test]
    fn existing_files_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.fit"), "yesterday").unwrap();

        let outcome = watch(&spec(dir.path(), "*.fit", Duration::from_millis(200))).unwrap();

        assert!(!outcome.is_found());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            watch(&spec(
                &dir.path().join("absent"),
                "*.PRN",
                Duration::from_millis(50)
            )),
            Err(WatchError::Watch { .. })
        ));
    }
}
