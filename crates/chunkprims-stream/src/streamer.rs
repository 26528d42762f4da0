use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use chunkprims_message::Message;
use tracing::{info, warn};

use crate::chunk_stream::{self, CONTROL};
use crate::error::{ChunkError, Result};
use crate::header::MAX_MESSAGE_LENGTH;
use crate::lock;
use crate::reader::{ChunkDemuxer, ChunkRead};
use crate::sched::{Done, WriterSched};
use crate::state::{StreamControlState, StreamControlStateConfig};
use crate::writer::{ChunkSink, ChunkStreamWriterTable, StagedMessage};

/// A message together with the message stream it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment {
    pub stream_id: u32,
    pub message: Message,
}

/// A message received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMessage {
    pub chunk_stream_id: u32,
    pub timestamp: u64,
    pub fragment: StreamFragment,
}

/// Sends protocol control messages on behalf of the read path:
/// `(chunk_stream_id, timestamp, message)`.
pub type ControlStreamWriter = dyn Fn(u32, u32, &Message) -> Result<()> + Send + Sync;

/// Message-level reader and writer over one chunked connection.
///
/// A single consumer calls [`read`](Self::read); any number of producers may
/// call [`write`](Self::write) concurrently. Physical writes happen on a
/// dedicated scheduler thread which lives until [`close`](Self::close), a
/// fatal error, or drop.
pub struct ChunkStreamer<R> {
    demux: Mutex<ChunkDemuxer<R>>,
    /// Mirrors the demuxer's byte count for readers outside the read lock.
    read_bytes: AtomicU64,
    writers: ChunkStreamWriterTable,
    sched: Arc<WriterSched>,
    self_state: Arc<StreamControlState>,
    peer_state: Arc<StreamControlState>,
    config: StreamControlStateConfig,
    control_writer: Mutex<Option<Arc<ControlStreamWriter>>>,
}

impl<R: Read> ChunkStreamer<R> {
    /// Start a streamer reading chunks from `reader` and writing to `writer`.
    pub fn new<W>(reader: R, writer: W, config: StreamControlStateConfig) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        config.validate()?;

        let self_state = Arc::new(StreamControlState::new(&config));
        let peer_state = Arc::new(StreamControlState::new(&config));
        let sched = WriterSched::spawn(ChunkSink::new(writer), Arc::clone(&self_state))?;

        Ok(Self {
            demux: Mutex::new(ChunkDemuxer::with_limits(
                reader,
                config.max_chunk_streams,
                config.max_message_size,
            )),
            read_bytes: AtomicU64::new(0),
            writers: ChunkStreamWriterTable::new(config.max_chunk_streams),
            sched,
            self_state,
            peer_state,
            config,
            control_writer: Mutex::new(None),
        })
    }

    /// Read the next complete message (blocking).
    ///
    /// Acknowledgements fall due while chunks are consumed, so one may be
    /// sent before the message being read is complete. A failed
    /// acknowledgement never costs the message being read; a fatal one
    /// terminates the streamer.
    pub fn read(&self) -> Result<ChunkMessage> {
        let mut demux = lock(&self.demux);
        let reassembled = loop {
            let progress = demux.read_chunk(self.peer_state.chunk_size());
            self.read_bytes
                .store(demux.total_read_bytes(), Ordering::Release);
            let progress = match progress {
                Ok(progress) => progress,
                Err(err) => return Err(self.read_failed(err)),
            };

            let threshold = self
                .config
                .ack_threshold(self.peer_state.ack_window_size());
            if let Some(total) = demux.take_ack_due(threshold) {
                if let Err(err) = self.send_ack(total) {
                    self.ack_failed(err);
                }
            }

            if let ChunkRead::Complete(message) = progress {
                break message;
            }
        };
        drop(demux);

        let message = Message::decode(reassembled.message_type_id, reassembled.payload)?;
        Ok(ChunkMessage {
            chunk_stream_id: reassembled.chunk_stream_id,
            timestamp: reassembled.timestamp,
            fragment: StreamFragment {
                stream_id: reassembled.message_stream_id,
                message,
            },
        })
    }

    /// Drop a partially received message on `chunk_stream_id`.
    ///
    /// Returns how many buffered bytes were discarded. Meant for the reading
    /// thread between reads; from elsewhere it waits out a blocked read.
    pub fn abort(&self, chunk_stream_id: u32) -> usize {
        lock(&self.demux).abort(chunk_stream_id)
    }

    /// Total bytes consumed from the peer. Never waits on a blocked read.
    pub fn total_read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Acquire)
    }

    fn ack_failed(&self, err: ChunkError) {
        warn!(error = %err, "acknowledgement not sent");
        if err.is_fatal() {
            self.sched.terminate(err);
        }
    }

    fn read_failed(&self, err: ChunkError) -> ChunkError {
        if err.is_fatal() || err.is_protocol_violation() {
            warn!(error = %err, "chunk stream read failed");
            self.sched.terminate(err.replicate());
        }
        err
    }
}

impl<R> ChunkStreamer<R> {
    /// Queue a message on `chunk_stream_id`, waiting while a previous
    /// message on the same chunk stream is still being written.
    pub fn write(
        &self,
        chunk_stream_id: u32,
        timestamp: u32,
        fragment: &StreamFragment,
    ) -> Result<()> {
        let staged = self.stage(chunk_stream_id, timestamp, fragment)?;
        let writer = self.writers.prepare(chunk_stream_id)?;
        loop {
            self.sched.wait_released(chunk_stream_id)?;
            match self.sched.sched(&writer, staged.clone()) {
                // Another producer took the lease first.
                Err(ChunkError::Busy(_)) => continue,
                result => return result,
            }
        }
    }

    /// Queue a message without waiting; fails with `Busy` if the chunk
    /// stream still has a message in flight.
    pub fn try_write(
        &self,
        chunk_stream_id: u32,
        timestamp: u32,
        fragment: &StreamFragment,
    ) -> Result<()> {
        let staged = self.stage(chunk_stream_id, timestamp, fragment)?;
        let writer = self.writers.prepare(chunk_stream_id)?;
        self.sched.sched(&writer, staged)
    }

    /// Block until every queued message has been written.
    pub fn flush(&self) -> Result<()> {
        self.sched.wait_idle();
        if self.sched.done().err().is_some() {
            return Err(ChunkError::Closed);
        }
        Ok(())
    }

    /// Parameters this side announced to the peer. The chunk size here
    /// governs outgoing chunks.
    pub fn self_state(&self) -> &Arc<StreamControlState> {
        &self.self_state
    }

    /// Parameters the peer announced. The chunk size here governs incoming
    /// chunks.
    pub fn peer_state(&self) -> &Arc<StreamControlState> {
        &self.peer_state
    }

    pub fn config(&self) -> &StreamControlStateConfig {
        &self.config
    }

    /// Route acknowledgements through `writer` instead of this streamer's own
    /// write path.
    pub fn set_control_stream_writer<F>(&self, writer: F)
    where
        F: Fn(u32, u32, &Message) -> Result<()> + Send + Sync + 'static,
    {
        *lock(&self.control_writer) = Some(Arc::new(writer));
    }

    /// Stop the scheduler. Messages still queued are dropped.
    pub fn close(&self) {
        self.sched.close();
    }

    /// Terminal completion signal.
    pub fn done(&self) -> &Arc<Done> {
        self.sched.done()
    }

    /// The error that terminated the streamer, if any.
    pub fn err(&self) -> Option<Arc<ChunkError>> {
        self.sched.done().err()
    }

    fn stage(
        &self,
        chunk_stream_id: u32,
        timestamp: u32,
        fragment: &StreamFragment,
    ) -> Result<StagedMessage> {
        if !chunk_stream::is_valid(chunk_stream_id) {
            return Err(ChunkError::InvalidChunkStreamId(chunk_stream_id));
        }

        let mut body = BytesMut::with_capacity(fragment.message.encoded_len());
        fragment.message.encode(&mut body)?;
        if body.is_empty() {
            return Err(ChunkError::EmptyMessage(chunk_stream_id));
        }

        let max = self.config.max_message_size.min(MAX_MESSAGE_LENGTH as usize);
        if body.len() > max {
            return Err(ChunkError::MessageTooLarge {
                size: body.len(),
                max,
            });
        }

        Ok(StagedMessage {
            timestamp,
            message_type_id: fragment.message.type_id(),
            message_stream_id: fragment.stream_id,
            payload: body.freeze(),
        })
    }

    fn send_ack(&self, total: u64) -> Result<()> {
        info!(total_read_bytes = total, "sending acknowledgement");
        // Sequence numbers wrap with the 4-byte field.
        let ack = Message::Ack {
            sequence_number: total as u32,
        };

        let control_writer = lock(&self.control_writer).clone();
        match control_writer {
            Some(writer) => writer(CONTROL, 0, &ack),
            None => self.write(
                CONTROL,
                0,
                &StreamFragment {
                    stream_id: 0,
                    message: ack,
                },
            ),
        }
    }
}

impl<R> Drop for ChunkStreamer<R> {
    fn drop(&mut self) {
        self.sched.close();
    }
}
