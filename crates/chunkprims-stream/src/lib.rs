//! Chunk-stream multiplexing for streaming media transports.
//!
//! Messages are split into chunks, each prefixed with a compact stateful
//! header:
//! - A 1-3 byte basic header carrying the format and the chunk stream id
//! - A 0, 3, 7 or 11 byte message header whose fields are inherited from
//!   the previous chunk on the same chunk stream
//! - An optional 4-byte extended timestamp
//!
//! [`ChunkStreamer`] reassembles incoming chunks into messages and schedules
//! outgoing messages from any number of producers onto one connection.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod chunk_stream;
pub mod error;
pub mod header;
pub mod reader;
pub mod sched;
pub mod state;
pub mod streamer;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use chunk_stream::{
    chunk_stream_name, AUDIO, COMMAND, CONTROL, DATA, MAX_CHUNK_STREAM_ID, MIN_CHUNK_STREAM_ID,
    VIDEO,
};
pub use error::{ChunkError, Result};
pub use header::{
    decode_basic_header, decode_message_header, encode_basic_header, encode_message_header,
    BasicHeader, MessageHeader, EXTENDED_TIMESTAMP, MAX_MESSAGE_LENGTH,
};
pub use reader::{ChunkDemuxer, ChunkRead, ChunkSource, ReassembledMessage};
pub use sched::{Done, WriterSched};
pub use state::{
    StreamControlState, StreamControlStateConfig, DEFAULT_ACK_WINDOW_SIZE, DEFAULT_CHUNK_SIZE,
    MAX_CHUNK_SIZE,
};
pub use streamer::{ChunkMessage, ChunkStreamer, ControlStreamWriter, StreamFragment};
pub use writer::{ChunkSink, ChunkStreamWriter, StagedMessage, WriteProgress};

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
