use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use crate::error::{ChunkError, Result};
use crate::header::{encode_basic_header, encode_message_header, BasicHeader, MessageHeader};
use crate::lock;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes encoded chunks to any `Write` stream.
///
/// Each chunk is assembled in an internal buffer and then written and
/// flushed as a unit.
pub struct ChunkSink<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> ChunkSink<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Clear and return the buffer for the next chunk.
    pub fn begin_chunk(&mut self) -> &mut BytesMut {
        self.buf.clear();
        &mut self.buf
    }

    /// Write the buffered chunk and flush (blocking).
    pub fn flush_chunk(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(ChunkError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(ChunkError::Io(err)),
            }
        }
        self.buf.clear();

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(ChunkError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// A message handed to a writer, waiting to be chunked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMessage {
    pub timestamp: u32,
    pub message_type_id: u8,
    pub message_stream_id: u32,
    pub payload: Bytes,
}

/// Whether a writer still holds payload after writing a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    Fragmented,
    Complete,
}

#[derive(Debug, Default)]
struct WriterState {
    /// Last header sent on this chunk stream.
    sent: Option<MessageHeader>,
    /// Value last carried in the timestamp field.
    timestamp_field: u32,
    staged: Option<StagedMessage>,
    pending: Bytes,
    continuation: bool,
}

impl WriterState {
    /// Pick the most compact format for the staged message and make its
    /// header the new baseline.
    fn update_header(&mut self, staged: &StagedMessage) -> (u8, MessageHeader) {
        let mut header = MessageHeader {
            timestamp: staged.timestamp,
            timestamp_delta: 0,
            message_length: staged.payload.len() as u32,
            message_type_id: staged.message_type_id,
            message_stream_id: staged.message_stream_id,
        };

        let fmt = match self.sent {
            Some(prev)
                if prev.message_stream_id == header.message_stream_id
                    && header.timestamp >= prev.timestamp =>
            {
                header.timestamp_delta = header.timestamp - prev.timestamp;
                if prev.message_length != header.message_length
                    || prev.message_type_id != header.message_type_id
                {
                    1
                } else if prev.timestamp_delta == header.timestamp_delta {
                    3
                } else {
                    2
                }
            }
            // First message, stream id change or timestamp rollback.
            _ => 0,
        };

        self.sent = Some(header);
        (fmt, header)
    }
}

/// Outgoing framing state of one chunk stream.
#[derive(Debug)]
pub struct ChunkStreamWriter {
    chunk_stream_id: u32,
    state: Mutex<WriterState>,
}

impl ChunkStreamWriter {
    pub fn new(chunk_stream_id: u32) -> Self {
        Self {
            chunk_stream_id,
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn chunk_stream_id(&self) -> u32 {
        self.chunk_stream_id
    }

    /// Load a message into the pending buffer.
    ///
    /// Callers hold the scheduler lease for this chunk stream, so the buffer
    /// is empty whenever this runs.
    pub fn stage(&self, message: StagedMessage) {
        let mut state = lock(&self.state);
        state.pending = message.payload.clone();
        state.staged = Some(message);
        state.continuation = false;
    }

    /// Payload bytes still waiting to be written.
    pub fn pending_len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Write one chunk of at most `chunk_size` payload bytes.
    pub fn write_chunk<W: Write>(
        &self,
        sink: &mut ChunkSink<W>,
        chunk_size: u32,
    ) -> Result<WriteProgress> {
        let mut state = lock(&self.state);
        let Some(staged) = state.staged.clone() else {
            return Ok(WriteProgress::Complete);
        };

        let (fmt, header) = if state.continuation {
            (3, state.sent.unwrap_or_default())
        } else {
            state.update_header(&staged)
        };
        let inherited = state.timestamp_field;
        debug!(
            fmt,
            chunk_stream_id = self.chunk_stream_id,
            ?header,
            "(WRITE) chunk header"
        );

        let buf = sink.begin_chunk();
        encode_basic_header(&BasicHeader::new(fmt, self.chunk_stream_id), buf)?;
        encode_message_header(fmt, &header, inherited, buf)?;
        let len = state.pending.len().min(chunk_size as usize);
        buf.extend_from_slice(&state.pending[..len]);
        state.pending.advance(len);
        state.timestamp_field = header.timestamp_field(fmt, inherited);

        sink.flush_chunk()?;

        if state.pending.is_empty() {
            state.staged = None;
            state.continuation = false;
            Ok(WriteProgress::Complete)
        } else {
            state.continuation = true;
            Ok(WriteProgress::Fragmented)
        }
    }
}

/// Writers keyed by chunk stream id, created on first use.
#[derive(Debug)]
pub struct ChunkStreamWriterTable {
    writers: Mutex<HashMap<u32, Arc<ChunkStreamWriter>>>,
    max_chunk_streams: usize,
}

impl ChunkStreamWriterTable {
    pub fn new(max_chunk_streams: usize) -> Self {
        Self {
            writers: Mutex::new(HashMap::new()),
            max_chunk_streams,
        }
    }

    pub fn get(&self, chunk_stream_id: u32) -> Option<Arc<ChunkStreamWriter>> {
        lock(&self.writers).get(&chunk_stream_id).cloned()
    }

    pub fn prepare(&self, chunk_stream_id: u32) -> Result<Arc<ChunkStreamWriter>> {
        let mut writers = lock(&self.writers);
        if let Some(writer) = writers.get(&chunk_stream_id) {
            return Ok(Arc::clone(writer));
        }
        if writers.len() >= self.max_chunk_streams {
            return Err(ChunkError::TooManyChunkStreams {
                max: self.max_chunk_streams,
            });
        }
        let writer = Arc::new(ChunkStreamWriter::new(chunk_stream_id));
        writers.insert(chunk_stream_id, Arc::clone(&writer));
        Ok(writer)
    }

    pub fn len(&self) -> usize {
        lock(&self.writers).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.writers).is_empty()
    }
}
