use bytes::{BufMut, BytesMut};

use crate::chunk_stream::{basic_header_len, is_valid};
use crate::error::{ChunkError, Result};

/// Sentinel carried in the 3-byte timestamp field when a 4-byte extended
/// timestamp follows the message header.
pub const EXTENDED_TIMESTAMP: u32 = 0x00FF_FFFF;

/// Largest message length expressible in the 3-byte length field.
pub const MAX_MESSAGE_LENGTH: u32 = 0x00FF_FFFF;

/// Size of the optional extended timestamp field.
pub const EXTENDED_TIMESTAMP_SIZE: usize = 4;

/// Basic header: chunk format and owning chunk stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasicHeader {
    /// Message header format, 0..=3.
    pub fmt: u8,
    /// The chunk stream this chunk belongs to.
    pub chunk_stream_id: u32,
}

impl BasicHeader {
    pub fn new(fmt: u8, chunk_stream_id: u32) -> Self {
        Self {
            fmt,
            chunk_stream_id,
        }
    }
}

/// Message header fields. Which ones travel on the wire depends on the
/// chunk format; the rest are inherited from the previous chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHeader {
    /// Absolute timestamp (format 0 only).
    pub timestamp: u32,
    /// Timestamp delta (formats 1 and 2).
    pub timestamp_delta: u32,
    /// Message length (formats 0 and 1).
    pub message_length: u32,
    /// Message type id (formats 0 and 1).
    pub message_type_id: u8,
    /// Message stream id (format 0 only).
    pub message_stream_id: u32,
}

impl MessageHeader {
    /// The value this header puts in its timestamp field.
    ///
    /// Format 3 has no timestamp field of its own and repeats `inherited`.
    pub fn timestamp_field(&self, fmt: u8, inherited: u32) -> u32 {
        match fmt {
            0 => self.timestamp,
            1 | 2 => self.timestamp_delta,
            _ => inherited,
        }
    }
}

/// Length of the fixed part of the message header for a format.
pub fn message_header_len(fmt: u8) -> Option<usize> {
    match fmt {
        0 => Some(11),
        1 => Some(7),
        2 => Some(3),
        3 => Some(0),
        _ => None,
    }
}

/// Decode a basic header from the front of `src`.
///
/// Returns `Ok(None)` if more bytes are needed. On success, also returns the
/// number of bytes consumed (1, 2 or 3).
pub fn decode_basic_header(src: &[u8]) -> Result<Option<(BasicHeader, usize)>> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };

    let fmt = first >> 6;
    let (chunk_stream_id, len) = match first & 0x3F {
        0 => {
            if src.len() < 2 {
                return Ok(None);
            }
            (u32::from(src[1]) + 64, 2)
        }
        1 => {
            if src.len() < 3 {
                return Ok(None);
            }
            (u32::from(u16::from_le_bytes([src[1], src[2]])) + 64, 3)
        }
        id => (u32::from(id), 1),
    };

    Ok(Some((BasicHeader::new(fmt, chunk_stream_id), len)))
}

/// Encode a basic header using the narrowest form for its chunk stream id.
///
/// Wire format:
/// ```text
/// ┌─────┬──────────┐
/// │ fmt │ id 2..63 │                              1 byte
/// ├─────┼──────────┼────────────┐
/// │ fmt │    0     │ id - 64    │                 2 bytes (64..=319)
/// ├─────┼──────────┼────────────┴───────────┐
/// │ fmt │    1     │ id - 64 (2B LE)        │     3 bytes (64..=65599)
/// └─────┴──────────┴────────────────────────┘
/// ```
pub fn encode_basic_header(header: &BasicHeader, dst: &mut BytesMut) -> Result<()> {
    if header.fmt > 3 {
        return Err(ChunkError::UnsupportedFormat(header.fmt));
    }
    let id = header.chunk_stream_id;
    if !is_valid(id) {
        return Err(ChunkError::InvalidChunkStreamId(id));
    }
    let fmt_bits = header.fmt << 6;

    match basic_header_len(id) {
        1 => dst.put_u8(fmt_bits | id as u8),
        2 => {
            dst.put_u8(fmt_bits);
            dst.put_u8((id - 64) as u8);
        }
        _ => {
            dst.put_u8(fmt_bits | 1);
            dst.put_u16_le((id - 64) as u16);
        }
    }
    Ok(())
}

/// Decode a message header of the given format from the front of `src`.
///
/// `inherited` is the value last carried in this chunk stream's timestamp
/// field; a format 3 header carries an extended timestamp only when that
/// value needed one. Returns `Ok(None)` if more bytes are needed.
pub fn decode_message_header(
    src: &[u8],
    fmt: u8,
    inherited: u32,
) -> Result<Option<(MessageHeader, usize)>> {
    let fixed = message_header_len(fmt).ok_or(ChunkError::UnsupportedFormat(fmt))?;
    if src.len() < fixed {
        return Ok(None);
    }

    let mut header = MessageHeader::default();
    let field = match fmt {
        0 => {
            header.message_length = read_u24(&src[3..6]);
            header.message_type_id = src[6];
            header.message_stream_id = u32::from_le_bytes([src[7], src[8], src[9], src[10]]);
            read_u24(&src[0..3])
        }
        1 => {
            header.message_length = read_u24(&src[3..6]);
            header.message_type_id = src[6];
            read_u24(&src[0..3])
        }
        2 => read_u24(&src[0..3]),
        _ => inherited,
    };

    let mut len = fixed;
    let mut value = field;
    if field >= EXTENDED_TIMESTAMP {
        if src.len() < fixed + EXTENDED_TIMESTAMP_SIZE {
            return Ok(None);
        }
        value = u32::from_be_bytes([src[fixed], src[fixed + 1], src[fixed + 2], src[fixed + 3]]);
        len += EXTENDED_TIMESTAMP_SIZE;
    }

    match fmt {
        0 => header.timestamp = value,
        1 | 2 => header.timestamp_delta = value,
        _ => {}
    }

    Ok(Some((header, len)))
}

/// Encode a message header of the given format.
///
/// `inherited` has the same meaning as in [`decode_message_header`].
pub fn encode_message_header(
    fmt: u8,
    header: &MessageHeader,
    inherited: u32,
    dst: &mut BytesMut,
) -> Result<()> {
    if fmt > 3 {
        return Err(ChunkError::UnsupportedFormat(fmt));
    }
    if fmt <= 1 && header.message_length > MAX_MESSAGE_LENGTH {
        return Err(ChunkError::MessageTooLarge {
            size: header.message_length as usize,
            max: MAX_MESSAGE_LENGTH as usize,
        });
    }

    let field = header.timestamp_field(fmt, inherited);
    let extended = field >= EXTENDED_TIMESTAMP;
    let short = field.min(EXTENDED_TIMESTAMP);

    match fmt {
        0 => {
            put_u24(dst, short);
            put_u24(dst, header.message_length);
            dst.put_u8(header.message_type_id);
            dst.put_u32_le(header.message_stream_id);
        }
        1 => {
            put_u24(dst, short);
            put_u24(dst, header.message_length);
            dst.put_u8(header.message_type_id);
        }
        2 => put_u24(dst, short),
        _ => {}
    }

    if extended {
        dst.put_u32(field);
    }
    Ok(())
}

fn read_u24(src: &[u8]) -> u32 {
    u32::from(src[0]) << 16 | u32::from(src[1]) << 8 | u32::from(src[2])
}

fn put_u24(dst: &mut BytesMut, value: u32) {
    dst.put_u8((value >> 16) as u8);
    dst.put_u8((value >> 8) as u8);
    dst.put_u8(value as u8);
}
