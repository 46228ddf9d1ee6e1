use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{Connector, LinkError, Port};

#[derive(Default)]
struct State {
    replies: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    write_error: Option<io::ErrorKind>,
    unavailable: bool,
    opened: usize,
    closed: usize,
}

/// In-memory stand-in for the relay box. Each open pops at most one scripted reply.
#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<State>>,
}

impl FakeDevice {
    pub fn reply(&self, bytes: &[u8]) {
        self.state.lock().replies.push_back(bytes.to_vec());
    }

    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.state.lock().write_error = Some(kind);
    }

    pub fn unplug(&self) {
        self.state.lock().unavailable = true;
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }
}

impl Connector for FakeDevice {
    fn name(&self) -> String {
        "fake".into()
    }

    fn open(&self) -> Result<Box<dyn Port>, LinkError> {
        let mut state = self.state.lock();

        if state.unavailable {
            return Err(LinkError::Io(io::ErrorKind::NotFound.into()));
        }

        state.opened += 1;

        Ok(Box::new(FakePort {
            state: Arc::clone(&self.state),
            pending: None,
            wrote: false,
        }))
    }
}

struct FakePort {
    state: Arc<Mutex<State>>,
    pending: Option<Vec<u8>>,
    wrote: bool,
}

impl Read for FakePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_none() {
            self.pending = self.state.lock().replies.pop_front();
        }

        match &mut self.pending {
            Some(pending) if !pending.is_empty() => {
                let len = buf.len().min(pending.len());
                buf[..len].copy_from_slice(&pending[..len]);
                pending.drain(..len);
                Ok(len)
            }
            _ => Err(io::ErrorKind::TimedOut.into()),
        }
    }
}

impl Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();

        if let Some(kind) = state.write_error {
            return Err(kind.into());
        }

        if !self.wrote {
            state.written.push(Vec::new());
            self.wrote = true;
        }

        if let Some(last) = state.written.last_mut() {
            last.extend_from_slice(buf);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FakePort {
    fn drop(&mut self) {
        self.state.lock().closed += 1;
    }
}
