use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MessageError, Result};
use crate::types::{
    is_protocol_control, ABORT, ACK, SET_CHUNK_SIZE, SET_PEER_BANDWIDTH, USER_CONTROL,
    WIN_ACK_SIZE,
};

/// Set Peer Bandwidth limit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    Hard,
    Soft,
    Dynamic,
}

impl LimitType {
    pub fn as_u8(self) -> u8 {
        match self {
            LimitType::Hard => 0,
            LimitType::Soft => 1,
            LimitType::Dynamic => 2,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(LimitType::Hard),
            1 => Ok(LimitType::Soft),
            2 => Ok(LimitType::Dynamic),
            other => Err(MessageError::InvalidLimitType(other)),
        }
    }
}

/// A message carried by the chunk layer.
///
/// Protocol control messages are decoded into typed variants; every other
/// message class is passed through untouched as [`Message::Opaque`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    SetChunkSize { chunk_size: u32 },
    Abort { chunk_stream_id: u32 },
    Ack { sequence_number: u32 },
    UserControl { event_type: u16, data: Bytes },
    WinAckSize { size: u32 },
    SetPeerBandwidth { size: u32, limit: LimitType },
    Opaque { type_id: u8, payload: Bytes },
}

impl Message {
    /// Build an opaque message, rejecting the protocol control type range.
    pub fn opaque(type_id: u8, payload: impl Into<Bytes>) -> Result<Self> {
        if is_protocol_control(type_id) {
            return Err(MessageError::ReservedTypeId(type_id));
        }
        Ok(Message::Opaque {
            type_id,
            payload: payload.into(),
        })
    }

    /// The wire type identifier of this message.
    pub fn type_id(&self) -> u8 {
        match self {
            Message::SetChunkSize { .. } => SET_CHUNK_SIZE,
            Message::Abort { .. } => ABORT,
            Message::Ack { .. } => ACK,
            Message::UserControl { .. } => USER_CONTROL,
            Message::WinAckSize { .. } => WIN_ACK_SIZE,
            Message::SetPeerBandwidth { .. } => SET_PEER_BANDWIDTH,
            Message::Opaque { type_id, .. } => *type_id,
        }
    }

    /// Decode a message body of the given type.
    pub fn decode(type_id: u8, mut body: Bytes) -> Result<Self> {
        let message = match type_id {
            SET_CHUNK_SIZE => {
                require(type_id, &body, 4)?;
                let raw = body.get_u32();
                let chunk_size = raw & 0x7FFF_FFFF;
                if chunk_size == 0 {
                    return Err(MessageError::InvalidChunkSize(raw));
                }
                Message::SetChunkSize { chunk_size }
            }
            ABORT => {
                require(type_id, &body, 4)?;
                Message::Abort {
                    chunk_stream_id: body.get_u32(),
                }
            }
            ACK => {
                require(type_id, &body, 4)?;
                Message::Ack {
                    sequence_number: body.get_u32(),
                }
            }
            USER_CONTROL => {
                require(type_id, &body, 2)?;
                let event_type = body.get_u16();
                Message::UserControl {
                    event_type,
                    data: body,
                }
            }
            WIN_ACK_SIZE => {
                require(type_id, &body, 4)?;
                Message::WinAckSize {
                    size: body.get_u32(),
                }
            }
            SET_PEER_BANDWIDTH => {
                require(type_id, &body, 5)?;
                let size = body.get_u32();
                let limit = LimitType::from_u8(body.get_u8())?;
                Message::SetPeerBandwidth { size, limit }
            }
            _ => Message::Opaque {
                type_id,
                payload: body,
            },
        };
        Ok(message)
    }

    /// Encode the message body (without any chunk framing).
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        match self {
            Message::SetChunkSize { chunk_size } => {
                if *chunk_size == 0 || *chunk_size > 0x7FFF_FFFF {
                    return Err(MessageError::InvalidChunkSize(*chunk_size));
                }
                dst.put_u32(*chunk_size);
            }
            Message::Abort { chunk_stream_id } => dst.put_u32(*chunk_stream_id),
            Message::Ack { sequence_number } => dst.put_u32(*sequence_number),
            Message::UserControl { event_type, data } => {
                dst.reserve(2 + data.len());
                dst.put_u16(*event_type);
                dst.put_slice(data);
            }
            Message::WinAckSize { size } => dst.put_u32(*size),
            Message::SetPeerBandwidth { size, limit } => {
                dst.put_u32(*size);
                dst.put_u8(limit.as_u8());
            }
            Message::Opaque { payload, .. } => dst.put_slice(payload),
        }
        Ok(())
    }

    /// Encoded body length in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Message::SetChunkSize { .. }
            | Message::Abort { .. }
            | Message::Ack { .. }
            | Message::WinAckSize { .. } => 4,
            Message::UserControl { data, .. } => 2 + data.len(),
            Message::SetPeerBandwidth { .. } => 5,
            Message::Opaque { payload, .. } => payload.len(),
        }
    }
}

fn require(type_id: u8, body: &Bytes, expected: usize) -> Result<()> {
    if body.len() < expected {
        return Err(MessageError::Truncated {
            type_id,
            expected,
            actual: body.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AUDIO, VIDEO};

    fn encoded(message: &Message) -> Bytes {
        let mut buf = BytesMut::new();
        message.encode(&mut buf).unwrap();
        buf.freeze()
    }

    #[test]
    fn ack_wire_layout() {
        let bytes = encoded(&Message::Ack {
            sequence_number: 0x0102_0304,
        });
        assert_eq!(bytes.as_ref(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn set_peer_bandwidth_wire_layout() {
        let bytes = encoded(&Message::SetPeerBandwidth {
            size: 2_500_000,
            limit: LimitType::Dynamic,
        });
        assert_eq!(bytes.len(), 5);
        assert_eq!(bytes[4], 2);

        let decoded = Message::decode(SET_PEER_BANDWIDTH, bytes).unwrap();
        assert_eq!(
            decoded,
            Message::SetPeerBandwidth {
                size: 2_500_000,
                limit: LimitType::Dynamic
            }
        );
    }

    #[test]
    fn set_chunk_size_ignores_reserved_bit_on_decode() {
        let body = Bytes::from_static(&[0x80, 0x00, 0x10, 0x00]);
        let decoded = Message::decode(SET_CHUNK_SIZE, body).unwrap();
        assert_eq!(decoded, Message::SetChunkSize { chunk_size: 4096 });
    }

    #[test]
    fn set_chunk_size_rejects_zero() {
        let body = Bytes::from_static(&[0, 0, 0, 0]);
        let err = Message::decode(SET_CHUNK_SIZE, body).unwrap_err();
        assert!(matches!(err, MessageError::InvalidChunkSize(0)));

        let mut buf = BytesMut::new();
        let err = Message::SetChunkSize { chunk_size: 0 }
            .encode(&mut buf)
            .unwrap_err();
        assert!(matches!(err, MessageError::InvalidChunkSize(0)));
    }

    #[test]
    fn truncated_control_body() {
        let err = Message::decode(ACK, Bytes::from_static(&[0, 1])).unwrap_err();
        assert!(matches!(
            err,
            MessageError::Truncated {
                type_id: ACK,
                expected: 4,
                actual: 2
            }
        ));
    }

    #[test]
    fn invalid_limit_type() {
        let body = Bytes::from_static(&[0, 0, 0, 1, 9]);
        let err = Message::decode(SET_PEER_BANDWIDTH, body).unwrap_err();
        assert!(matches!(err, MessageError::InvalidLimitType(9)));
    }

    #[test]
    fn user_control_keeps_event_data() {
        let message = Message::UserControl {
            event_type: 6,
            data: Bytes::from_static(&[0, 0, 0, 42]),
        };
        let bytes = encoded(&message);
        assert_eq!(bytes.len(), message.encoded_len());
        assert_eq!(Message::decode(USER_CONTROL, bytes).unwrap(), message);
    }

    #[test]
    fn opaque_passthrough() {
        let body = Bytes::from_static(b"\x17\x01video-frame");
        let decoded = Message::decode(VIDEO, body.clone()).unwrap();
        assert_eq!(decoded.type_id(), VIDEO);
        assert_eq!(encoded(&decoded), body);
    }

    #[test]
    fn opaque_rejects_control_type_ids() {
        assert!(matches!(
            Message::opaque(ACK, Bytes::new()),
            Err(MessageError::ReservedTypeId(ACK))
        ));
        assert!(Message::opaque(AUDIO, Bytes::from_static(b"aac")).is_ok());
    }
}
