use chunkprims_message::MessageError;

/// Errors that can occur while framing or reassembling chunk streams.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// The basic header carried a format outside 0..=3.
    #[error("unsupported chunk format {0}")]
    UnsupportedFormat(u8),

    /// The chunk stream id cannot be expressed in a basic header.
    #[error("invalid chunk stream id {0} (valid range 2..=65599)")]
    InvalidChunkStreamId(u32),

    /// A chunk arrived for a sub-stream that has no bytes left to receive.
    #[error(
        "invalid state on chunk stream {chunk_stream_id}: message length {message_length}, \
         already buffered {buffered}"
    )]
    InvalidState {
        chunk_stream_id: u32,
        message_length: u32,
        buffered: usize,
    },

    /// The declared message length exceeds the configured maximum.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The peer opened more chunk streams than allowed.
    #[error("too many chunk streams (max {max})")]
    TooManyChunkStreams { max: usize },

    /// Zero-length messages cannot be framed.
    #[error("empty message on chunk stream {0}")]
    EmptyMessage(u32),

    /// Chunk size outside the accepted range.
    #[error("invalid chunk size {size} (max {max})")]
    InvalidChunkSize { size: u32, max: u32 },

    /// The stream configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Window size above the accepted maximum.
    #[error("invalid window size {size} (max {max})")]
    InvalidWindowSize { size: u32, max: u32 },

    /// The message body could not be encoded or decoded.
    #[error("message codec error: {0}")]
    Message(#[from] MessageError),

    /// A write is already in flight on this chunk stream.
    #[error("chunk stream {0} has a write in flight")]
    Busy(u32),

    /// The streamer was closed or its scheduler terminated.
    #[error("chunk streamer closed")]
    Closed,

    /// An I/O error occurred on the underlying connection.
    #[error("chunk I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete chunk was received.
    #[error("connection closed (incomplete chunk)")]
    ConnectionClosed,

    /// An internal invariant broke inside the scheduler.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChunkError {
    /// Whether the error invalidates the whole connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChunkError::Io(_) | ChunkError::ConnectionClosed | ChunkError::Internal(_)
        )
    }

    /// Whether the peer broke the chunk framing, leaving the read side
    /// out of sync.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ChunkError::UnsupportedFormat(_)
                | ChunkError::InvalidState { .. }
                | ChunkError::MessageTooLarge { .. }
                | ChunkError::TooManyChunkStreams { .. }
        )
    }

    /// Whether the error is a scheduling conflict the producer may retry.
    pub fn is_busy(&self) -> bool {
        matches!(self, ChunkError::Busy(_))
    }

    /// Copy of a connection-level error, kept as the streamer's terminal
    /// error while the original is returned to the caller.
    pub(crate) fn replicate(&self) -> ChunkError {
        match self {
            ChunkError::UnsupportedFormat(fmt) => ChunkError::UnsupportedFormat(*fmt),
            ChunkError::InvalidState {
                chunk_stream_id,
                message_length,
                buffered,
            } => ChunkError::InvalidState {
                chunk_stream_id: *chunk_stream_id,
                message_length: *message_length,
                buffered: *buffered,
            },
            ChunkError::MessageTooLarge { size, max } => ChunkError::MessageTooLarge {
                size: *size,
                max: *max,
            },
            ChunkError::TooManyChunkStreams { max } => {
                ChunkError::TooManyChunkStreams { max: *max }
            }
            ChunkError::Io(err) => ChunkError::Io(std::io::Error::new(err.kind(), err.to_string())),
            ChunkError::ConnectionClosed => ChunkError::ConnectionClosed,
            ChunkError::Closed => ChunkError::Closed,
            other => ChunkError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChunkError>;
