//! Chunked message framing.
//!
//! Every Bolt message travels as one or more chunks: a 2-byte big-endian
//! payload length followed by that many payload bytes. A zero-length chunk
//! terminates the message. Zero-length chunks between messages are keep-alive
//! no-ops.

use crate::MAX_CHUNK_PAYLOAD;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Send-side framer.
///
/// `begin_message` reserves space for the first chunk header; the caller then
/// appends the encoded message through [`buf_mut`](Chunker::buf_mut);
/// `end_message` back-patches the header, splitting oversized payloads into
/// max-size chunks, and appends the zero-length terminator.
#[derive(Default)]
pub struct Chunker {
    buf: BytesMut,
    offset: usize,
}

impl Chunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the length header of the next message's first chunk.
    pub fn begin_message(&mut self) {
        self.buf.put_u16(0);
        self.offset = self.buf.len();
    }

    /// Buffer the message body is packed into.
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Position where the current message body starts (after its header).
    pub fn message_start(&self) -> usize {
        self.offset
    }

    /// Finalizes the current message: patches chunk headers and appends the
    /// end-of-message marker.
    pub fn end_message(&mut self) {
        let mut size = self.buf.len() - self.offset;
        while size > MAX_CHUNK_PAYLOAD {
            let hdr = self.offset - 2;
            self.buf[hdr..hdr + 2].copy_from_slice(&(MAX_CHUNK_PAYLOAD as u16).to_be_bytes());
            // The next chunk's header is spliced in right after this chunk's
            // payload; the remaining body shifts two bytes right.
            insert_header(&mut self.buf, self.offset + MAX_CHUNK_PAYLOAD);
            self.offset += MAX_CHUNK_PAYLOAD + 2;
            size -= MAX_CHUNK_PAYLOAD;
        }
        let hdr = self.offset - 2;
        self.buf[hdr..hdr + 2].copy_from_slice(&(size as u16).to_be_bytes());

        // Zero chunk marks end of message.
        self.buf.put_u16(0);
    }

    /// Takes all framed messages accumulated so far.
    pub fn take(&mut self) -> Bytes {
        self.offset = 0;
        self.buf.split().freeze()
    }

    /// Discards any accumulated output.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.offset = 0;
    }

    /// Rolls the buffer back to `len` bytes, abandoning a partial message.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Total bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Makes room for a 2-byte chunk header at `pos`, shifting the tail right.
fn insert_header(buf: &mut BytesMut, pos: usize) {
    let old_len = buf.len();
    buf.resize(old_len + 2, 0);
    buf.copy_within(pos..old_len, pos + 2);
    buf[pos] = 0;
    buf[pos + 1] = 0;
}

/// Receive-side reassembly state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Waiting for the 2-byte chunk length.
    AwaitingSize,
    /// Waiting for the remaining bytes of the current chunk body.
    AwaitingBody(usize),
}

/// Reassembles chunked input into complete message buffers.
///
/// Feed raw socket bytes into `decode`; it returns one complete message at a
/// time, or `None` when more input is needed. Partial chunk bodies are
/// consumed incrementally, so arbitrary split points in the input are fine.
pub struct ChunkDecoder {
    state: ChunkState,
    message: BytesMut,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            state: ChunkState::AwaitingSize,
            message: BytesMut::new(),
        }
    }

    /// Consumes as much of `buf` as possible; returns the next complete
    /// message, if any.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Option<Bytes> {
        loop {
            match self.state {
                ChunkState::AwaitingSize => {
                    if buf.len() < 2 {
                        return None;
                    }
                    let size = buf.get_u16() as usize;
                    if size == 0 {
                        if !self.message.is_empty() {
                            return Some(self.message.split().freeze());
                        }
                        // Keep-alive zero chunk between messages: tolerated.
                        continue;
                    }
                    self.state = ChunkState::AwaitingBody(size);
                }
                ChunkState::AwaitingBody(remaining) => {
                    if buf.is_empty() {
                        return None;
                    }
                    let take = remaining.min(buf.len());
                    self.message.extend_from_slice(&buf.split_to(take));
                    if take < remaining {
                        self.state = ChunkState::AwaitingBody(remaining - take);
                        return None;
                    }
                    self.state = ChunkState::AwaitingSize;
                }
            }
        }
    }

    /// Bytes accumulated for the in-flight message.
    pub fn pending(&self) -> usize {
        self.message.len()
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Bytes {
        let mut c = Chunker::new();
        c.begin_message();
        c.buf_mut().extend_from_slice(payload);
        c.end_message();
        c.take()
    }

    #[test]
    fn test_single_chunk_layout() {
        let framed = frame(b"hello");
        assert_eq!(&framed[..2], &[0x00, 0x05]);
        assert_eq!(&framed[2..7], b"hello");
        assert_eq!(&framed[7..], &[0x00, 0x00]);
    }

    #[test]
    fn test_roundtrip_small() {
        let framed = frame(b"hello");
        let mut buf = BytesMut::from(&framed[..]);
        let mut dec = ChunkDecoder::new();
        let msg = dec.decode(&mut buf).unwrap();
        assert_eq!(&msg[..], b"hello");
        assert!(dec.decode(&mut buf).is_none());
    }

    #[test]
    fn test_oversized_message_splits() {
        let payload: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();
        let framed = frame(&payload);

        // 200000 = 3 full chunks of 0xFFFF plus a 3395-byte remainder.
        assert_eq!(&framed[..2], &[0xFF, 0xFF]);
        let expected_len = payload.len() + 2 * 4 + 2;
        assert_eq!(framed.len(), expected_len);

        let mut buf = BytesMut::from(&framed[..]);
        let mut dec = ChunkDecoder::new();
        let msg = dec.decode(&mut buf).unwrap();
        assert_eq!(&msg[..], &payload[..]);
    }

    #[test]
    fn test_split_points_are_transparent() {
        let payload: Vec<u8> = (0..70_000u32).map(|i| (i * 7) as u8).collect();
        let framed = frame(&payload);

        // Feed the stream one byte at a time.
        let mut dec = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        let mut out = None;
        for b in framed.iter() {
            buf.extend_from_slice(&[*b]);
            if let Some(msg) = dec.decode(&mut buf) {
                assert!(out.is_none());
                out = Some(msg);
            }
        }
        assert_eq!(&out.unwrap()[..], &payload[..]);
    }

    #[test]
    fn test_zero_chunk_keepalive_tolerated() {
        let mut dec = ChunkDecoder::new();
        // Two idle zero chunks before any payload: no message, no error.
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert!(dec.decode(&mut buf).is_none());
        assert_eq!(dec.pending(), 0);

        // Payload arrives afterwards and completes normally.
        let framed = frame(b"ok");
        buf.extend_from_slice(&framed);
        let msg = dec.decode(&mut buf).unwrap();
        assert_eq!(&msg[..], b"ok");
    }

    #[test]
    fn test_message_across_multiple_chunks() {
        // Hand-built: "ab" + "cd" in two chunks, then terminator.
        let raw = [0x00, 0x02, b'a', b'b', 0x00, 0x02, b'c', b'd', 0x00, 0x00];
        let mut buf = BytesMut::from(&raw[..]);
        let mut dec = ChunkDecoder::new();
        let msg = dec.decode(&mut buf).unwrap();
        assert_eq!(&msg[..], b"abcd");
    }

    #[test]
    fn test_two_messages_back_to_back() {
        let mut c = Chunker::new();
        c.begin_message();
        c.buf_mut().extend_from_slice(b"first");
        c.end_message();
        c.begin_message();
        c.buf_mut().extend_from_slice(b"second");
        c.end_message();
        let framed = c.take();

        let mut buf = BytesMut::from(&framed[..]);
        let mut dec = ChunkDecoder::new();
        assert_eq!(&dec.decode(&mut buf).unwrap()[..], b"first");
        assert_eq!(&dec.decode(&mut buf).unwrap()[..], b"second");
        assert!(dec.decode(&mut buf).is_none());
    }

    #[test]
    fn test_exactly_max_chunk_payload() {
        let payload = vec![0x42u8; MAX_CHUNK_PAYLOAD];
        let framed = frame(&payload);
        // One full chunk, no split.
        assert_eq!(framed.len(), 2 + MAX_CHUNK_PAYLOAD + 2);
        assert_eq!(&framed[..2], &[0xFF, 0xFF]);

        let mut buf = BytesMut::from(&framed[..]);
        let mut dec = ChunkDecoder::new();
        assert_eq!(dec.decode(&mut buf).unwrap().len(), MAX_CHUNK_PAYLOAD);
    }

    #[test]
    fn test_chunker_reset() {
        let mut c = Chunker::new();
        c.begin_message();
        c.buf_mut().extend_from_slice(b"junk");
        c.reset();
        assert_eq!(c.buffered(), 0);

        c.begin_message();
        c.buf_mut().extend_from_slice(b"ok");
        c.end_message();
        let framed = c.take();
        assert_eq!(&framed[..2], &[0x00, 0x02]);
    }
}
