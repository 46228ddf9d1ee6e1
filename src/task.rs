use std::{
    sync::mpsc::{channel, Receiver, RecvTimeoutError},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{error, warn};

/// Work pushed onto a named thread so the calibration sequence does not block on it.
///
/// The result is collected with [`BackgroundTask::join_timeout`]; a task that overruns is
/// abandoned and left to finish on its own.
pub struct BackgroundTask<T> {
    name: String,
    result_rx: Receiver<T>,
    handle: JoinHandle<()>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    pub fn spawn(name: impl Into<String>, work: impl FnOnce() -> T + Send + 'static) -> Self {
        let name = name.into();
        let (result_tx, result_rx) = channel();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                // The receiver is gone once the task has been abandoned
                let _ = result_tx.send(work());
            })
            .expect("failed to spawn background task thread");

        Self {
            name,
            result_rx,
            handle,
        }
    }

    pub fn join_timeout(self, timeout: Duration) -> Option<T> {
        match self.result_rx.recv_timeout(timeout) {
            Ok(result) => {
                let _ = self.handle.join();
                Some(result)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(task = %self.name, ?timeout, "abandoning background task");
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!(task = %self.name, "background task panicked");
                None
            }
        }
    }
}
