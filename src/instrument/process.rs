use std::{
    ffi::OsStr,
    fmt::{self, Display},
};

use sysinfo::{ProcessesToUpdate, System};

/// Identifiers of the running instances of the instrument binary. Empty means not running.
///
/// Always a fresh snapshot; the host can start or stop the instrument behind our back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessHandle {
    pids: Vec<u32>,
}

impl ProcessHandle {
    pub fn new(mut pids: Vec<u32>) -> Self {
        pids.sort_unstable();
        pids.dedup();

        Self { pids }
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    pub fn pids(&self) -> &[u32] {
        &self.pids
    }
}

impl Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.pids).finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Termination {
    pub killed: usize,
    /// Instances that refused the kill, usually for lack of permission.
    pub denied: usize,
}

/// Host process enumeration and termination, by exact process name.
pub trait ProcessTable: Send + Sync {
    fn instances(&self, name: &str) -> ProcessHandle;

    fn terminate(&self, name: &str) -> Termination;
}

/// [`ProcessTable`] backed by the operating system's process list.
#[derive(Debug, Default)]
pub struct SysinfoTable;

impl SysinfoTable {
    fn snapshot() -> System {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
    }
}

impl ProcessTable for SysinfoTable {
    fn instances(&self, name: &str) -> ProcessHandle {
        let system = Self::snapshot();

        ProcessHandle::new(
            system
                .processes_by_exact_name(OsStr::new(name))
                .map(|process| process.pid().as_u32())
                .collect(),
        )
    }

    fn terminate(&self, name: &str) -> Termination {
        let system = Self::snapshot();

        system
            .processes_by_exact_name(OsStr::new(name))
            .fold(Termination::default(), |mut termination, process| {
                if process.kill() {
                    termination.killed += 1;
                } else {
                    termination.denied += 1;
                }

                termination
            })
    }
}
