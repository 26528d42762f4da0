use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use chunkprims_message::LimitType;
use serde::{Deserialize, Serialize};

use crate::error::{ChunkError, Result};
use crate::header::MAX_MESSAGE_LENGTH;

/// Chunk size every connection starts with.
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Largest chunk size either side may negotiate.
pub const MAX_CHUNK_SIZE: u32 = 0x00FF_FFFF;

/// Default acknowledgement window: 2.5 MB.
pub const DEFAULT_ACK_WINDOW_SIZE: u32 = 2_500_000;

/// Default peer bandwidth window: 2.5 MB.
pub const DEFAULT_BANDWIDTH_WINDOW_SIZE: u32 = 2_500_000;

/// Acknowledge once this fraction of the peer window has been read.
pub const DEFAULT_ACK_THRESHOLD_DIVISOR: u32 = 2;

/// Default cap on distinct chunk streams a peer may open.
pub const DEFAULT_MAX_CHUNK_STREAMS: usize = 128;

/// Default cap on a single reassembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = MAX_MESSAGE_LENGTH as usize;

/// Configuration for both stream control states and the reassembly limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamControlStateConfig {
    /// Initial chunk size for both directions.
    pub default_chunk_size: u32,
    /// Upper bound accepted by `set_chunk_size`.
    pub max_chunk_size: u32,
    /// Initial acknowledgement window.
    pub default_ack_window_size: u32,
    /// Upper bound accepted by `set_ack_window_size`.
    pub max_ack_window_size: u32,
    /// Initial peer bandwidth window.
    pub default_bandwidth_window_size: u32,
    /// Initial bandwidth limit type (0 hard, 1 soft, 2 dynamic).
    pub default_bandwidth_limit_type: u8,
    /// Upper bound accepted by `set_bandwidth`.
    pub max_bandwidth_window_size: u32,
    /// An acknowledgement is sent after `ack_window_size / divisor` bytes.
    pub ack_threshold_divisor: u32,
    /// Maximum number of chunk streams tracked per direction.
    pub max_chunk_streams: usize,
    /// Maximum declared length of a single message.
    pub max_message_size: usize,
}

impl Default for StreamControlStateConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            default_ack_window_size: DEFAULT_ACK_WINDOW_SIZE,
            max_ack_window_size: u32::MAX,
            default_bandwidth_window_size: DEFAULT_BANDWIDTH_WINDOW_SIZE,
            default_bandwidth_limit_type: LimitType::Dynamic.as_u8(),
            max_bandwidth_window_size: u32::MAX,
            ack_threshold_divisor: DEFAULT_ACK_THRESHOLD_DIVISOR,
            max_chunk_streams: DEFAULT_MAX_CHUNK_STREAMS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl StreamControlStateConfig {
    /// Reject configurations the streamer cannot run with.
    pub fn validate(&self) -> Result<()> {
        check_chunk_size(self.default_chunk_size, self.max_chunk_size)?;
        check_window(self.default_ack_window_size, self.max_ack_window_size)?;
        check_window(
            self.default_bandwidth_window_size,
            self.max_bandwidth_window_size,
        )?;
        LimitType::from_u8(self.default_bandwidth_limit_type)?;
        if self.ack_threshold_divisor == 0 {
            return Err(ChunkError::InvalidConfig(
                "ack_threshold_divisor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Bytes read after which an acknowledgement is due for `window`.
    pub fn ack_threshold(&self, window: u32) -> u64 {
        u64::from(window) / u64::from(self.ack_threshold_divisor.max(1))
    }
}

/// Negotiated parameters of one side of the connection.
///
/// Mutated by control-message handling while the read path and the writer
/// scheduler read it on every chunk, so every field is atomic.
#[derive(Debug)]
pub struct StreamControlState {
    chunk_size: AtomicU32,
    ack_window_size: AtomicU32,
    bandwidth_window_size: AtomicU32,
    bandwidth_limit_type: AtomicU8,
    max_chunk_size: u32,
    max_ack_window_size: u32,
    max_bandwidth_window_size: u32,
}

impl StreamControlState {
    pub fn new(config: &StreamControlStateConfig) -> Self {
        Self {
            chunk_size: AtomicU32::new(config.default_chunk_size),
            ack_window_size: AtomicU32::new(config.default_ack_window_size),
            bandwidth_window_size: AtomicU32::new(config.default_bandwidth_window_size),
            bandwidth_limit_type: AtomicU8::new(config.default_bandwidth_limit_type),
            max_chunk_size: config.max_chunk_size,
            max_ack_window_size: config.max_ack_window_size,
            max_bandwidth_window_size: config.max_bandwidth_window_size,
        }
    }

    /// Maximum payload bytes per chunk.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size.load(Ordering::Acquire)
    }

    pub fn set_chunk_size(&self, size: u32) -> Result<()> {
        check_chunk_size(size, self.max_chunk_size)?;
        self.chunk_size.store(size, Ordering::Release);
        Ok(())
    }

    /// Bytes after which an acknowledgement is expected.
    pub fn ack_window_size(&self) -> u32 {
        self.ack_window_size.load(Ordering::Acquire)
    }

    pub fn set_ack_window_size(&self, size: u32) -> Result<()> {
        check_window(size, self.max_ack_window_size)?;
        self.ack_window_size.store(size, Ordering::Release);
        Ok(())
    }

    pub fn bandwidth_window_size(&self) -> u32 {
        self.bandwidth_window_size.load(Ordering::Acquire)
    }

    pub fn bandwidth_limit_type(&self) -> LimitType {
        // Only validated values are ever stored.
        LimitType::from_u8(self.bandwidth_limit_type.load(Ordering::Acquire))
            .unwrap_or(LimitType::Dynamic)
    }

    pub fn set_bandwidth(&self, size: u32, limit: LimitType) -> Result<()> {
        check_window(size, self.max_bandwidth_window_size)?;
        self.bandwidth_window_size.store(size, Ordering::Release);
        self.bandwidth_limit_type
            .store(limit.as_u8(), Ordering::Release);
        Ok(())
    }
}

impl Default for StreamControlState {
    fn default() -> Self {
        Self::new(&StreamControlStateConfig::default())
    }
}

fn check_chunk_size(size: u32, max: u32) -> Result<()> {
    if size == 0 || size > max {
        return Err(ChunkError::InvalidChunkSize { size, max });
    }
    Ok(())
}

fn check_window(size: u32, max: u32) -> Result<()> {
    if size > max {
        return Err(ChunkError::InvalidWindowSize { size, max });
    }
    Ok(())
}
