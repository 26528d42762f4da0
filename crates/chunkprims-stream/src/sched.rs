use std::any::Any;
use std::collections::BTreeMap;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::{ChunkError, Result};
use crate::lock;
use crate::state::StreamControlState;
use crate::writer::{ChunkSink, ChunkStreamWriter, StagedMessage, WriteProgress};

/// Name of the scheduler thread.
pub const SCHED_THREAD_NAME: &str = "chunkprims-sched";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Wake,
    Close,
}

#[derive(Debug, Default)]
struct Registry {
    /// Writers with a message in flight. Membership is the per-id lease.
    writers: BTreeMap<u32, Arc<ChunkStreamWriter>>,
    closed: bool,
}

#[derive(Debug, Default)]
struct DoneState {
    finished: bool,
    err: Option<Arc<ChunkError>>,
}

/// Terminal completion signal of a streamer.
#[derive(Debug, Default)]
pub struct Done {
    state: Mutex<DoneState>,
    cond: Condvar,
}

impl Done {
    /// Whether the scheduler has stopped.
    pub fn is_done(&self) -> bool {
        lock(&self.state).finished
    }

    /// Block until the scheduler has stopped.
    pub fn wait(&self) {
        let mut state = lock(&self.state);
        while !state.finished {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the scheduler has stopped or `timeout` elapses.
    /// Returns whether it stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = lock(&self.state);
        let (state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |state| !state.finished)
            .unwrap_or_else(PoisonError::into_inner);
        state.finished
    }

    /// The error that terminated the streamer, if any. It can be set while
    /// the scheduler is still finishing a chunk.
    pub fn err(&self) -> Option<Arc<ChunkError>> {
        lock(&self.state).err.clone()
    }

    /// Keep `err` as the terminal error unless one is already recorded.
    /// Completion is left to the scheduler thread.
    fn record(&self, err: ChunkError) {
        let mut state = lock(&self.state);
        if !state.finished && state.err.is_none() {
            state.err = Some(Arc::new(err));
        }
    }

    fn finish(&self, err: Option<ChunkError>) {
        let mut state = lock(&self.state);
        if !state.finished {
            state.finished = true;
            if state.err.is_none() {
                state.err = err.map(Arc::new);
            }
        }
        drop(state);
        self.cond.notify_all();
    }
}

/// Serializes chunk writes from every chunk stream onto one connection.
///
/// A dedicated thread owns the transport writer and round-robins one chunk
/// per registered writer per pass, in chunk stream id order.
#[derive(Debug)]
pub struct WriterSched {
    registry: Mutex<Registry>,
    released: Condvar,
    signal: Sender<Signal>,
    done: Arc<Done>,
}

impl WriterSched {
    /// Start the scheduler thread writing to `sink`.
    ///
    /// Chunk sizes are read from `state` on every chunk.
    pub fn spawn<W>(sink: ChunkSink<W>, state: Arc<StreamControlState>) -> Result<Arc<Self>>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let sched = Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            released: Condvar::new(),
            signal: tx,
            done: Arc::new(Done::default()),
        });

        let worker = Arc::clone(&sched);
        thread::Builder::new()
            .name(SCHED_THREAD_NAME.to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| worker.run(&rx, sink, &state)))
                    .unwrap_or_else(|payload| Err(ChunkError::Internal(panic_message(payload))));
                worker.finish(result);
            })?;

        Ok(sched)
    }

    /// Stage `message` on `writer` and queue it.
    ///
    /// Never waits: returns `Busy` if the chunk stream already has a write in
    /// flight and `Closed` once the scheduler stopped.
    pub fn sched(&self, writer: &Arc<ChunkStreamWriter>, message: StagedMessage) -> Result<()> {
        let chunk_stream_id = writer.chunk_stream_id();
        let mut registry = lock(&self.registry);
        if registry.closed {
            return Err(ChunkError::Closed);
        }
        if registry.writers.contains_key(&chunk_stream_id) {
            return Err(ChunkError::Busy(chunk_stream_id));
        }

        writer.stage(message);
        registry
            .writers
            .insert(chunk_stream_id, Arc::clone(writer));
        drop(registry);

        self.signal
            .send(Signal::Wake)
            .map_err(|_| ChunkError::Closed)
    }

    /// Block while `chunk_stream_id` has a write in flight.
    pub fn wait_released(&self, chunk_stream_id: u32) -> Result<()> {
        let mut registry = lock(&self.registry);
        while !registry.closed && registry.writers.contains_key(&chunk_stream_id) {
            registry = self
                .released
                .wait(registry)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if registry.closed {
            return Err(ChunkError::Closed);
        }
        Ok(())
    }

    /// Block until no write is in flight or the scheduler stopped.
    pub fn wait_idle(&self) {
        let mut registry = lock(&self.registry);
        while !registry.closed && !registry.writers.is_empty() {
            registry = self
                .released
                .wait(registry)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Whether `chunk_stream_id` has a write in flight.
    pub fn is_scheduled(&self, chunk_stream_id: u32) -> bool {
        lock(&self.registry).writers.contains_key(&chunk_stream_id)
    }

    /// Stop accepting messages and ask the thread to exit.
    pub fn close(&self) {
        let mut registry = lock(&self.registry);
        registry.closed = true;
        drop(registry);
        self.released.notify_all();
        // The thread is already gone if this fails.
        let _ = self.signal.send(Signal::Close);
    }

    /// Record `err` as terminal and stop the thread. [`Done`] fires once the
    /// thread has exited.
    pub fn terminate(&self, err: ChunkError) {
        self.done.record(err);
        self.close();
    }

    pub fn done(&self) -> &Arc<Done> {
        &self.done
    }

    fn run<W: Write>(
        &self,
        signals: &Receiver<Signal>,
        mut sink: ChunkSink<W>,
        state: &StreamControlState,
    ) -> Result<()> {
        info!("writer scheduler started");
        loop {
            match signals.recv() {
                Ok(Signal::Wake) => {}
                Ok(Signal::Close) | Err(_) => return Ok(()),
            }

            while self.run_actives(&mut sink, state)? {
                match signals.try_recv() {
                    Ok(Signal::Close) | Err(TryRecvError::Disconnected) => return Ok(()),
                    Ok(Signal::Wake) | Err(TryRecvError::Empty) => {}
                }
            }
        }
    }

    /// One pass: a chunk from every registered writer. Returns whether any
    /// writer is still registered afterwards.
    fn run_actives<W: Write>(
        &self,
        sink: &mut ChunkSink<W>,
        state: &StreamControlState,
    ) -> Result<bool> {
        let active: Vec<Arc<ChunkStreamWriter>> =
            lock(&self.registry).writers.values().cloned().collect();
        if active.is_empty() {
            return Ok(false);
        }

        let mut finished = Vec::new();
        for writer in &active {
            if writer.write_chunk(sink, state.chunk_size())? == WriteProgress::Complete {
                debug!(chunk_stream_id = writer.chunk_stream_id(), "(WRITE) message flushed");
                finished.push(writer.chunk_stream_id());
            }
        }

        let mut registry = lock(&self.registry);
        for chunk_stream_id in finished {
            registry.writers.remove(&chunk_stream_id);
        }
        let remaining = !registry.writers.is_empty();
        drop(registry);
        self.released.notify_all();

        Ok(remaining)
    }

    fn finish(&self, result: Result<()>) {
        let mut registry = lock(&self.registry);
        registry.closed = true;
        registry.writers.clear();
        drop(registry);
        self.released.notify_all();

        match result {
            Ok(()) => {
                info!("writer scheduler stopped");
                self.done.finish(None);
            }
            Err(err) => {
                error!(error = %err, "writer scheduler terminated");
                self.done.finish(Some(err));
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return format!("scheduler panicked: {message}");
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return format!("scheduler panicked: {message}");
    }
    "scheduler panicked".to_string()
}
