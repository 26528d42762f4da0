use std::collections::HashMap;
use std::io::{ErrorKind, Read};

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use crate::error::{ChunkError, Result};
use crate::header::{decode_basic_header, decode_message_header, BasicHeader, MessageHeader};
use crate::state::{DEFAULT_MAX_CHUNK_STREAMS, DEFAULT_MAX_MESSAGE_SIZE};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Buffered byte source for the read path.
///
/// Handles partial reads internally and counts every byte handed to the
/// demultiplexer, which is what acknowledgements report.
pub struct ChunkSource<T> {
    inner: T,
    buf: BytesMut,
    total_read_bytes: u64,
}

impl<T: Read> ChunkSource<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            total_read_bytes: 0,
        }
    }

    /// Read the next basic header (blocking).
    pub fn read_basic_header(&mut self) -> Result<BasicHeader> {
        loop {
            if let Some((header, len)) = decode_basic_header(&self.buf)? {
                self.consume(len);
                return Ok(header);
            }
            self.fill()?;
        }
    }

    /// Read the message header that follows a basic header (blocking).
    pub fn read_message_header(&mut self, fmt: u8, inherited: u32) -> Result<MessageHeader> {
        loop {
            if let Some((header, len)) = decode_message_header(&self.buf, fmt, inherited)? {
                self.consume(len);
                return Ok(header);
            }
            self.fill()?;
        }
    }

    /// Move exactly `len` payload bytes into `dst` (blocking).
    pub fn read_payload(&mut self, len: usize, dst: &mut BytesMut) -> Result<()> {
        while self.buf.len() < len {
            self.fill()?;
        }
        dst.extend_from_slice(&self.buf[..len]);
        self.consume(len);
        Ok(())
    }

    /// Bytes consumed since the source was created.
    pub fn total_read_bytes(&self) -> u64 {
        self.total_read_bytes
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the source and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    fn consume(&mut self, len: usize) {
        self.buf.advance(len);
        self.total_read_bytes += len as u64;
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ChunkError::Io(err)),
            };

            if read == 0 {
                return Err(ChunkError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
            return Ok(());
        }
    }
}

/// Reassembly state of one chunk stream.
#[derive(Debug, Default)]
pub struct ChunkStreamReader {
    basic_header: BasicHeader,
    message_header: MessageHeader,
    timestamp: u64,
    timestamp_delta: u32,
    message_length: u32,
    message_type_id: u8,
    message_stream_id: u32,
    timestamp_field: u32,
    buf: BytesMut,
}

impl ChunkStreamReader {
    pub fn basic_header(&self) -> &BasicHeader {
        &self.basic_header
    }

    pub fn message_header(&self) -> &MessageHeader {
        &self.message_header
    }

    /// Running absolute timestamp of the last completed message.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn timestamp_delta(&self) -> u32 {
        self.timestamp_delta
    }

    pub fn message_length(&self) -> u32 {
        self.message_length
    }

    pub fn message_type_id(&self) -> u8 {
        self.message_type_id
    }

    pub fn message_stream_id(&self) -> u32 {
        self.message_stream_id
    }

    /// Bytes of the in-progress message received so far.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn apply(&mut self, basic: BasicHeader, header: MessageHeader) {
        match basic.fmt {
            0 => {
                self.timestamp = u64::from(header.timestamp);
                self.timestamp_delta = 0;
                self.message_length = header.message_length;
                self.message_type_id = header.message_type_id;
                self.message_stream_id = header.message_stream_id;
            }
            1 => {
                self.timestamp_delta = header.timestamp_delta;
                self.message_length = header.message_length;
                self.message_type_id = header.message_type_id;
            }
            2 => {
                self.timestamp_delta = header.timestamp_delta;
            }
            _ => {}
        }
        self.timestamp_field = header.timestamp_field(basic.fmt, self.timestamp_field);
        self.basic_header = basic;
        self.message_header = header;
    }

    fn expected_len(&self) -> Result<usize> {
        let remaining = self.message_length as usize;
        match remaining.checked_sub(self.buf.len()) {
            Some(n) if n > 0 => Ok(n),
            _ => Err(ChunkError::InvalidState {
                chunk_stream_id: self.basic_header.chunk_stream_id,
                message_length: self.message_length,
                buffered: self.buf.len(),
            }),
        }
    }
}

/// Per chunk stream reassembly table, created lazily as ids appear.
#[derive(Debug)]
pub struct ChunkStreamReaderTable {
    readers: HashMap<u32, ChunkStreamReader>,
    max_chunk_streams: usize,
}

impl ChunkStreamReaderTable {
    pub fn new(max_chunk_streams: usize) -> Self {
        Self {
            readers: HashMap::new(),
            max_chunk_streams,
        }
    }

    pub fn get(&self, chunk_stream_id: u32) -> Option<&ChunkStreamReader> {
        self.readers.get(&chunk_stream_id)
    }

    /// Look up the reader for an id, creating it if the table has room.
    pub fn prepare(&mut self, chunk_stream_id: u32) -> Result<&mut ChunkStreamReader> {
        if !self.readers.contains_key(&chunk_stream_id)
            && self.readers.len() >= self.max_chunk_streams
        {
            return Err(ChunkError::TooManyChunkStreams {
                max: self.max_chunk_streams,
            });
        }
        Ok(self.readers.entry(chunk_stream_id).or_default())
    }

    /// Discard a partially received message. Returns the dropped byte count.
    pub fn abort(&mut self, chunk_stream_id: u32) -> usize {
        match self.readers.get_mut(&chunk_stream_id) {
            Some(reader) => {
                let dropped = reader.buf.len();
                reader.buf.clear();
                dropped
            }
            None => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

/// A fully reassembled message body and its header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledMessage {
    pub chunk_stream_id: u32,
    pub timestamp: u64,
    pub message_type_id: u8,
    pub message_stream_id: u32,
    pub payload: Bytes,
}

/// Outcome of consuming one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkRead {
    /// The chunk belonged to a message that still needs more chunks.
    Fragmented { chunk_stream_id: u32 },
    /// The chunk completed a message.
    Complete(ReassembledMessage),
}

/// Read path: turns chunks into messages.
pub struct ChunkDemuxer<T> {
    source: ChunkSource<T>,
    readers: ChunkStreamReaderTable,
    max_message_size: usize,
    acknowledged_bytes: u64,
}

impl<T: Read> ChunkDemuxer<T> {
    pub fn new(inner: T) -> Self {
        Self::with_limits(inner, DEFAULT_MAX_CHUNK_STREAMS, DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_limits(inner: T, max_chunk_streams: usize, max_message_size: usize) -> Self {
        Self {
            source: ChunkSource::new(inner),
            readers: ChunkStreamReaderTable::new(max_chunk_streams),
            max_message_size,
            acknowledged_bytes: 0,
        }
    }

    /// Consume exactly one chunk from the stream.
    ///
    /// `chunk_size` is the peer's current maximum chunk payload.
    pub fn read_chunk(&mut self, chunk_size: u32) -> Result<ChunkRead> {
        let basic = self.source.read_basic_header()?;
        let chunk_stream_id = basic.chunk_stream_id;
        debug!(fmt = basic.fmt, chunk_stream_id, "(READ) basic header");

        let inherited = self
            .readers
            .get(chunk_stream_id)
            .map_or(0, |reader| reader.timestamp_field);
        let header = self.source.read_message_header(basic.fmt, inherited)?;
        debug!(?header, "(READ) message header");

        if basic.fmt <= 1 && header.message_length as usize > self.max_message_size {
            return Err(ChunkError::MessageTooLarge {
                size: header.message_length as usize,
                max: self.max_message_size,
            });
        }

        let reader = self.readers.prepare(chunk_stream_id)?;
        reader.apply(basic, header);

        let expect_len = reader.expected_len()?.min(chunk_size as usize);
        debug!(
            message_length = reader.message_length,
            buffered = reader.buf.len(),
            expect_len,
            "(READ) payload"
        );
        self.source.read_payload(expect_len, &mut reader.buf)?;

        if reader.buf.len() < reader.message_length as usize {
            return Ok(ChunkRead::Fragmented { chunk_stream_id });
        }

        reader.timestamp += u64::from(reader.timestamp_delta);

        Ok(ChunkRead::Complete(ReassembledMessage {
            chunk_stream_id,
            timestamp: reader.timestamp,
            message_type_id: reader.message_type_id,
            message_stream_id: reader.message_stream_id,
            payload: reader.buf.split().freeze(),
        }))
    }

    /// Read chunks until some chunk stream completes a message.
    pub fn read_message(&mut self, chunk_size: u32) -> Result<ReassembledMessage> {
        loop {
            if let ChunkRead::Complete(message) = self.read_chunk(chunk_size)? {
                return Ok(message);
            }
        }
    }

    /// Returns the total byte count to acknowledge once more than
    /// `threshold` bytes were read since the previous acknowledgement.
    ///
    /// A zero threshold disables acknowledgements.
    pub fn take_ack_due(&mut self, threshold: u64) -> Option<u64> {
        if threshold == 0 {
            return None;
        }
        let total = self.source.total_read_bytes();
        if total - self.acknowledged_bytes > threshold {
            self.acknowledged_bytes = total;
            return Some(total);
        }
        None
    }

    pub fn total_read_bytes(&self) -> u64 {
        self.source.total_read_bytes()
    }

    pub fn readers(&self) -> &ChunkStreamReaderTable {
        &self.readers
    }

    /// Drop a partially received message on `chunk_stream_id`.
    pub fn abort(&mut self, chunk_stream_id: u32) -> usize {
        self.readers.abort(chunk_stream_id)
    }

    /// Borrow the byte source.
    pub fn source(&self) -> &ChunkSource<T> {
        &self.source
    }

    /// Consume the demultiplexer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.source.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BufMut;

    use super::*;
    use crate::header::{encode_basic_header, encode_message_header, EXTENDED_TIMESTAMP};

    /// Hand-rolled wire builder, independent of the write path.
    #[derive(Default)]
    struct Wire {
        buf: BytesMut,
        fields: HashMap<u32, u32>,
    }

    impl Wire {
        fn chunk(&mut self, fmt: u8, id: u32, header: MessageHeader, payload: &[u8]) -> &mut Self {
            let inherited = self.fields.get(&id).copied().unwrap_or(0);
            encode_basic_header(&BasicHeader::new(fmt, id), &mut self.buf).unwrap();
            encode_message_header(fmt, &header, inherited, &mut self.buf).unwrap();
            self.fields
                .insert(id, header.timestamp_field(fmt, inherited));
            self.buf.put_slice(payload);
            self
        }

        fn demuxer(&self) -> ChunkDemuxer<Cursor<Vec<u8>>> {
            ChunkDemuxer::new(Cursor::new(self.buf.to_vec()))
        }
    }

    fn fmt0(timestamp: u32, length: u32, type_id: u8, stream_id: u32) -> MessageHeader {
        MessageHeader {
            timestamp,
            message_length: length,
            message_type_id: type_id,
            message_stream_id: stream_id,
            ..MessageHeader::default()
        }
    }

    fn delta(timestamp_delta: u32) -> MessageHeader {
        MessageHeader {
            timestamp_delta,
            ..MessageHeader::default()
        }
    }

    #[test]
    fn single_chunk_message() {
        let mut wire = Wire::default();
        wire.chunk(0, 3, fmt0(1000, 5, 20, 1), b"hello");

        let mut demux = wire.demuxer();
        let message = demux.read_message(128).unwrap();
        assert_eq!(message.chunk_stream_id, 3);
        assert_eq!(message.timestamp, 1000);
        assert_eq!(message.message_type_id, 20);
        assert_eq!(message.message_stream_id, 1);
        assert_eq!(message.payload.as_ref(), b"hello");
        assert_eq!(demux.total_read_bytes(), wire.buf.len() as u64);
    }

    #[test]
    fn fragmented_message_reassembles() {
        let payload: Vec<u8> = (0..10).collect();
        let mut wire = Wire::default();
        wire.chunk(0, 4, fmt0(7, 10, 8, 1), &payload[0..4])
            .chunk(3, 4, MessageHeader::default(), &payload[4..8])
            .chunk(3, 4, MessageHeader::default(), &payload[8..10]);

        let mut demux = wire.demuxer();
        assert_eq!(
            demux.read_chunk(4).unwrap(),
            ChunkRead::Fragmented { chunk_stream_id: 4 }
        );
        assert_eq!(demux.readers().get(4).unwrap().buffered(), 4);
        assert_eq!(
            demux.read_chunk(4).unwrap(),
            ChunkRead::Fragmented { chunk_stream_id: 4 }
        );
        let ChunkRead::Complete(message) = demux.read_chunk(4).unwrap() else {
            panic!("third chunk should complete the message");
        };
        assert_eq!(message.payload.as_ref(), payload.as_slice());
        assert_eq!(message.timestamp, 7);
        assert_eq!(demux.readers().get(4).unwrap().buffered(), 0);
    }

    #[test]
    fn interleaved_chunk_streams() {
        let audio: Vec<u8> = (0..9).collect();
        let video: Vec<u8> = (100..107).collect();
        let mut wire = Wire::default();
        wire.chunk(0, 4, fmt0(0, 9, 8, 1), &audio[0..3])
            .chunk(0, 6, fmt0(0, 7, 9, 1), &video[0..3])
            .chunk(3, 4, MessageHeader::default(), &audio[3..6])
            .chunk(3, 6, MessageHeader::default(), &video[3..6])
            .chunk(3, 4, MessageHeader::default(), &audio[6..9])
            .chunk(3, 6, MessageHeader::default(), &video[6..7]);

        let mut demux = wire.demuxer();
        let first = demux.read_message(3).unwrap();
        assert_eq!(first.chunk_stream_id, 4);
        assert_eq!(first.payload.as_ref(), audio.as_slice());

        let second = demux.read_message(3).unwrap();
        assert_eq!(second.chunk_stream_id, 6);
        assert_eq!(second.payload.as_ref(), video.as_slice());
    }

    #[test]
    fn reassembly_for_many_lengths_and_chunk_sizes() {
        for length in [1usize, 2, 7, 128, 129, 300] {
            for chunk_size in [1usize, 3, 4, 128, 1000] {
                let payload: Vec<u8> = (0..length).map(|i| (i * 7) as u8).collect();
                let mut wire = Wire::default();
                let mut offset = 0;
                while offset < length {
                    let end = (offset + chunk_size).min(length);
                    let header = if offset == 0 {
                        fmt0(5, length as u32, 9, 1)
                    } else {
                        MessageHeader::default()
                    };
                    let fmt = if offset == 0 { 0 } else { 3 };
                    wire.chunk(fmt, 6, header, &payload[offset..end]);
                    offset = end;
                }

                let mut demux = wire.demuxer();
                let message = demux.read_message(chunk_size as u32).unwrap();
                assert_eq!(message.payload.as_ref(), payload.as_slice());
            }
        }
    }

    #[test]
    fn deltas_accumulate_per_format() {
        let mut wire = Wire::default();
        wire.chunk(0, 3, fmt0(100, 1, 9, 1), b"a")
            .chunk(
                1,
                3,
                MessageHeader {
                    timestamp_delta: 40,
                    message_length: 2,
                    message_type_id: 8,
                    ..MessageHeader::default()
                },
                b"bb",
            )
            .chunk(2, 3, delta(10), b"cc")
            .chunk(3, 3, MessageHeader::default(), b"dd");

        let mut demux = wire.demuxer();
        let stamps: Vec<(u64, u8, u32)> = (0..4)
            .map(|_| {
                let m = demux.read_message(128).unwrap();
                (m.timestamp, m.message_type_id, m.message_stream_id)
            })
            .collect();
        assert_eq!(
            stamps,
            vec![(100, 9, 1), (140, 8, 1), (150, 8, 1), (160, 8, 1)]
        );
    }

    #[test]
    fn extended_timestamp_on_continuation_chunks() {
        let base = EXTENDED_TIMESTAMP + 10;
        let mut wire = Wire::default();
        wire.chunk(0, 5, fmt0(base, 4, 9, 1), b"ab")
            .chunk(3, 5, MessageHeader::default(), b"cd");

        let mut demux = wire.demuxer();
        let message = demux.read_message(2).unwrap();
        assert_eq!(message.timestamp, u64::from(base));
        assert_eq!(message.payload.as_ref(), b"abcd");
    }

    #[test]
    fn format3_without_prior_header_is_invalid_state() {
        let mut wire = Wire::default();
        wire.chunk(3, 3, MessageHeader::default(), b"");

        let mut demux = wire.demuxer();
        let err = demux.read_chunk(128).unwrap_err();
        assert!(matches!(
            err,
            ChunkError::InvalidState {
                chunk_stream_id: 3,
                message_length: 0,
                buffered: 0
            }
        ));
    }

    #[test]
    fn oversized_message_rejected() {
        let mut wire = Wire::default();
        wire.chunk(0, 3, fmt0(0, 1024, 9, 1), b"");

        let mut demux = ChunkDemuxer::with_limits(Cursor::new(wire.buf.to_vec()), 8, 512);
        let err = demux.read_chunk(128).unwrap_err();
        assert!(matches!(
            err,
            ChunkError::MessageTooLarge {
                size: 1024,
                max: 512
            }
        ));
    }

    #[test]
    fn chunk_stream_limit() {
        let mut wire = Wire::default();
        wire.chunk(0, 3, fmt0(0, 1, 9, 1), b"a")
            .chunk(0, 4, fmt0(0, 1, 9, 1), b"b");

        let mut demux = ChunkDemuxer::with_limits(Cursor::new(wire.buf.to_vec()), 1, 1024);
        demux.read_chunk(128).unwrap();
        let err = demux.read_chunk(128).unwrap_err();
        assert!(matches!(err, ChunkError::TooManyChunkStreams { max: 1 }));
    }

    #[test]
    fn abort_discards_partial_message() {
        let mut wire = Wire::default();
        wire.chunk(0, 3, fmt0(0, 6, 9, 1), b"xxx")
            .chunk(0, 3, fmt0(50, 2, 9, 1), b"ok");

        let mut demux = wire.demuxer();
        assert!(matches!(
            demux.read_chunk(3).unwrap(),
            ChunkRead::Fragmented { .. }
        ));
        assert_eq!(demux.abort(3), 3);
        assert_eq!(demux.abort(99), 0);

        let message = demux.read_message(3).unwrap();
        assert_eq!(message.payload.as_ref(), b"ok");
        assert_eq!(message.timestamp, 50);
    }

    #[test]
    fn eof_mid_chunk_is_connection_closed() {
        let mut wire = Wire::default();
        wire.chunk(0, 3, fmt0(0, 10, 9, 1), b"abc");

        let mut demux = wire.demuxer();
        let err = demux.read_chunk(128).unwrap_err();
        assert!(matches!(err, ChunkError::ConnectionClosed));
    }

    #[test]
    fn eof_at_boundary_is_connection_closed() {
        let mut demux = ChunkDemuxer::new(Cursor::new(Vec::<u8>::new()));
        assert!(matches!(
            demux.read_chunk(128).unwrap_err(),
            ChunkError::ConnectionClosed
        ));
    }

    #[test]
    fn ack_due_once_per_threshold() {
        let mut wire = Wire::default();
        for _ in 0..4 {
            wire.chunk(0, 3, fmt0(0, 20, 9, 1), &[0u8; 20]);
        }

        let mut demux = wire.demuxer();
        let mut acks = Vec::new();
        for _ in 0..4 {
            demux.read_chunk(128).unwrap();
            if let Some(total) = demux.take_ack_due(40) {
                acks.push(total);
            }
        }
        // Each chunk is 1 + 11 + 20 = 32 bytes.
        assert_eq!(acks, vec![64, 128]);
        assert_eq!(demux.take_ack_due(0), None);
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn partial_read_handling() {
        let mut wire = Wire::default();
        wire.chunk(0, 300, fmt0(EXTENDED_TIMESTAMP, 4, 9, 1), b"slow");

        let mut demux = ChunkDemuxer::new(ByteByByteReader {
            bytes: wire.buf.to_vec(),
            pos: 0,
        });
        let message = demux.read_message(128).unwrap();
        assert_eq!(message.chunk_stream_id, 300);
        assert_eq!(message.timestamp, u64::from(EXTENDED_TIMESTAMP));
        assert_eq!(message.payload.as_ref(), b"slow");
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = Wire::default();
        wire.chunk(0, 3, fmt0(0, 2, 9, 1), b"ok");

        let mut demux = ChunkDemuxer::new(InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire.buf.to_vec()),
        });
        assert_eq!(demux.read_message(128).unwrap().payload.as_ref(), b"ok");
    }

    #[test]
    fn io_error_propagates() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::ConnectionReset))
            }
        }

        let mut demux = ChunkDemuxer::new(Broken);
        let err = demux.read_chunk(128).unwrap_err();
        assert!(matches!(err, ChunkError::Io(e) if e.kind() == ErrorKind::ConnectionReset));
    }
}
