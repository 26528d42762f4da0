//! Message type identifiers.
//!
//! Types 1-6 are protocol control messages and always travel on chunk
//! stream 2 with message stream 0. Everything else is opaque to this crate.

/// Set Chunk Size.
pub const SET_CHUNK_SIZE: u8 = 1;

/// Abort Message.
pub const ABORT: u8 = 2;

/// Acknowledgement.
pub const ACK: u8 = 3;

/// User Control Message.
pub const USER_CONTROL: u8 = 4;

/// Window Acknowledgement Size.
pub const WIN_ACK_SIZE: u8 = 5;

/// Set Peer Bandwidth.
pub const SET_PEER_BANDWIDTH: u8 = 6;

/// Audio data.
pub const AUDIO: u8 = 8;

/// Video data.
pub const VIDEO: u8 = 9;

/// Data message (AMF3).
pub const DATA_AMF3: u8 = 15;

/// Shared object message (AMF3).
pub const SHARED_OBJECT_AMF3: u8 = 16;

/// Command message (AMF3).
pub const COMMAND_AMF3: u8 = 17;

/// Data message (AMF0).
pub const DATA_AMF0: u8 = 18;

/// Shared object message (AMF0).
pub const SHARED_OBJECT_AMF0: u8 = 19;

/// Command message (AMF0).
pub const COMMAND_AMF0: u8 = 20;

/// Aggregate message.
pub const AGGREGATE: u8 = 22;

/// Returns a human-readable name for a message type id.
pub fn type_name(type_id: u8) -> &'static str {
    match type_id {
        SET_CHUNK_SIZE => "SetChunkSize",
        ABORT => "Abort",
        ACK => "Ack",
        USER_CONTROL => "UserControl",
        WIN_ACK_SIZE => "WinAckSize",
        SET_PEER_BANDWIDTH => "SetPeerBandwidth",
        AUDIO => "Audio",
        VIDEO => "Video",
        DATA_AMF3 | DATA_AMF0 => "Data",
        SHARED_OBJECT_AMF3 | SHARED_OBJECT_AMF0 => "SharedObject",
        COMMAND_AMF3 | COMMAND_AMF0 => "Command",
        AGGREGATE => "Aggregate",
        _ => "Unknown",
    }
}

/// Returns true if the type id is a protocol control message.
pub fn is_protocol_control(type_id: u8) -> bool {
    (SET_CHUNK_SIZE..=SET_PEER_BANDWIDTH).contains(&type_id)
}
