//! Chunk-stream multiplexing for streaming media transports.
//!
//! chunkprims splits messages into compactly framed chunks, interleaves them
//! across numbered chunk streams on one connection, and reassembles them on
//! the other side.
//!
//! # Crate Structure
//!
//! - [`message`] — Message type identifiers and the protocol control codec
//! - [`stream`] — Chunk headers, reassembly, the writer scheduler and
//!   [`stream::ChunkStreamer`]

/// Re-export message types.
pub mod message {
    pub use chunkprims_message::*;
}

/// Re-export chunk stream types.
pub mod stream {
    pub use chunkprims_stream::*;
}
