/// Errors that can occur while encoding or decoding a message body.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The body is shorter than the fixed layout of its message type.
    #[error("message type {type_id} body too short ({actual} bytes, need {expected})")]
    Truncated {
        type_id: u8,
        expected: usize,
        actual: usize,
    },

    /// Set Peer Bandwidth carried an unknown limit type.
    #[error("invalid bandwidth limit type {0}")]
    InvalidLimitType(u8),

    /// Set Chunk Size with the reserved top bit set or a zero size.
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(u32),

    /// A typed control message was constructed with an opaque type id.
    #[error("type id {0} is reserved for protocol control messages")]
    ReservedTypeId(u8),
}

pub type Result<T> = std::result::Result<T, MessageError>;
