//! Transport doubles shared by the scheduler and streamer tests.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::lock;

/// In-memory transport that stays inspectable after the scheduler took
/// ownership of its writer half.
#[derive(Clone, Default)]
pub(crate) struct SharedBuf(pub(crate) Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub(crate) fn contents(&self) -> Vec<u8> {
        lock(&self.0).clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Blocks every write until the gate opens.
#[derive(Clone, Default)]
pub(crate) struct GatedWriter {
    gate: Arc<(Mutex<bool>, Condvar)>,
    pub(crate) out: SharedBuf,
}

impl GatedWriter {
    pub(crate) fn open(&self) {
        let (open, cond) = &*self.gate;
        *lock(open) = true;
        cond.notify_all();
    }
}

impl Write for GatedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (open, cond) = &*self.gate;
        let mut open = lock(open);
        while !*open {
            open = cond.wait(open).unwrap();
        }
        drop(open);
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Fails every write with `BrokenPipe`, counting attempts.
#[derive(Clone, Default)]
pub(crate) struct FailingWriter(pub(crate) Arc<AtomicUsize>);

impl FailingWriter {
    pub(crate) fn attempts(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
