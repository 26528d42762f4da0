//! Well-known chunk stream ids.
//!
//! Ids 0 and 1 are encoding markers in the basic header and never name a
//! stream. Id 2 is reserved for protocol control messages.

/// Protocol control messages (set chunk size, acknowledgement, ...).
pub const CONTROL: u32 = 2;

/// Conventional stream for command messages.
pub const COMMAND: u32 = 3;

/// Conventional stream for audio.
pub const AUDIO: u32 = 4;

/// Conventional stream for video.
pub const VIDEO: u32 = 6;

/// Conventional stream for data messages.
pub const DATA: u32 = 8;

/// Smallest encodable chunk stream id.
pub const MIN_CHUNK_STREAM_ID: u32 = 2;

/// Largest encodable chunk stream id (3-byte basic header).
pub const MAX_CHUNK_STREAM_ID: u32 = 65599;

/// Returns a human-readable name for a chunk stream id.
pub fn chunk_stream_name(id: u32) -> &'static str {
    match id {
        CONTROL => "CONTROL",
        COMMAND => "COMMAND",
        AUDIO => "AUDIO",
        VIDEO => "VIDEO",
        DATA => "DATA",
        _ => "USER",
    }
}

/// Returns true if the id can be carried in a basic header.
pub fn is_valid(id: u32) -> bool {
    (MIN_CHUNK_STREAM_ID..=MAX_CHUNK_STREAM_ID).contains(&id)
}

/// Number of bytes the basic header needs for this id.
pub fn basic_header_len(id: u32) -> usize {
    match id {
        0..=63 => 1,
        64..=319 => 2,
        _ => 3,
    }
}
