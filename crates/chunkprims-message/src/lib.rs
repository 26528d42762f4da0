//! Message codec for the chunk-stream layer.
//!
//! The chunk layer only needs two things from a message: its type identifier
//! and its encoded body. This crate provides both:
//! - Type identifier constants for every message class
//! - Typed protocol-control messages (set chunk size, acknowledgement, ...)
//! - Opaque passthrough for media, data and command messages

pub mod error;
pub mod message;
pub mod types;

pub use error::{MessageError, Result};
pub use message::{LimitType, Message};
pub use types::{
    is_protocol_control, type_name, ABORT, ACK, AGGREGATE, AUDIO, COMMAND_AMF0, COMMAND_AMF3,
    DATA_AMF0, DATA_AMF3, SET_CHUNK_SIZE, SET_PEER_BANDWIDTH, SHARED_OBJECT_AMF0,
    SHARED_OBJECT_AMF3, USER_CONTROL, VIDEO, WIN_ACK_SIZE,
};
