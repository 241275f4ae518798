//! Frame encoding/decoding utilities.
//!
//! Each message travels in a self-delimiting frame:
//!
//! ```text
//! +------+------+--------------+---------+-----+----------+-----------+
//! | 0x55 | 0xAA | body_len u32 | hdr_crc | tag | body ... | crc32 u32 |
//! +------+------+--------------+---------+-----+----------+-----------+
//! ```
//!
//! `body_len` counts the tag and body. `hdr_crc` is a CRC-8 over the length
//! field so a damaged length is caught before the decoder waits for bytes
//! that will never arrive. The trailer is a CRC-32 over everything between
//! the sync marker and the trailer. All integers are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC, CRC_8_SMBUS};

use crate::constants::*;
use crate::error::{FrameError, ProtocolError};
use crate::messages::Message;

const HEADER_CHECK: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
const BODY_CHECK: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Outcome of a single decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A complete frame was consumed.
    Success(Message),
    /// Not enough bytes yet. Nothing was consumed.
    Incomplete,
    /// A malformed prefix was discarded. Try again.
    Corrupt(FrameError),
}

/// A transactional codec over a buffered byte stream.
///
/// Incoming bytes are appended with [`MessageCodec::push`]. Each call to
/// [`MessageCodec::decode`] either commits exactly one frame, consumes
/// nothing, or drops a corrupt prefix so the next call can resynchronize.
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl MessageCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        MessageCodec {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempt to decode one frame from the front of the buffer.
    pub fn decode(&mut self) -> DecodeStatus {
        if self.buffer.is_empty() {
            return DecodeStatus::Incomplete;
        }

        let misaligned = self.buffer[0] != FRAME_SYNC[0]
            || (self.buffer.len() >= 2 && self.buffer[1] != FRAME_SYNC[1]);
        if misaligned {
            let skipped = next_sync(&self.buffer);
            self.buffer.advance(skipped);
            log::trace!("skipped {} bytes looking for frame sync", skipped);
            return DecodeStatus::Corrupt(FrameError::NoSync { skipped });
        }

        if self.buffer.len() < FRAME_HEADER_SIZE {
            return DecodeStatus::Incomplete;
        }

        let len_bytes = [self.buffer[2], self.buffer[3], self.buffer[4], self.buffer[5]];
        let expected_check = HEADER_CHECK.checksum(&len_bytes);
        let actual_check = self.buffer[6];
        if expected_check != actual_check {
            self.buffer.advance(1);
            return DecodeStatus::Corrupt(FrameError::BadHeaderCheck {
                expected: expected_check,
                actual: actual_check,
            });
        }

        let body_len = u32::from_le_bytes(len_bytes);
        if body_len == 0 || body_len as usize > MAX_BODY_LEN {
            self.buffer.advance(1);
            return DecodeStatus::Corrupt(FrameError::BadLength(body_len));
        }

        let body_end = FRAME_HEADER_SIZE + body_len as usize;
        let total = body_end + FRAME_TRAILER_SIZE;
        if self.buffer.len() < total {
            return DecodeStatus::Incomplete;
        }

        let expected_crc = BODY_CHECK.checksum(&self.buffer[2..body_end]);
        let actual_crc = u32::from_le_bytes([
            self.buffer[body_end],
            self.buffer[body_end + 1],
            self.buffer[body_end + 2],
            self.buffer[body_end + 3],
        ]);
        if expected_crc != actual_crc {
            self.buffer.advance(1);
            return DecodeStatus::Corrupt(FrameError::BadChecksum {
                expected: expected_crc,
                actual: actual_crc,
            });
        }

        // Frame boundary is trustworthy from here on, so commit it even if
        // the body turns out to be undecodable.
        let frame = self.buffer.split_to(total).freeze();
        match Message::decode_body(frame.slice(FRAME_HEADER_SIZE..body_end)) {
            Ok(message) => DecodeStatus::Success(message),
            Err(e) => DecodeStatus::Corrupt(FrameError::Malformed(e)),
        }
    }

    /// Decode every complete frame currently buffered.
    ///
    /// Stops at the first [`DecodeStatus::Incomplete`]. Corrupt outcomes are
    /// yielded as errors so the caller can count or log them.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { codec: self }
    }

    /// Encode a message into a complete frame.
    pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
        let body_len = message.encoded_len();
        if body_len > MAX_BODY_LEN {
            return Err(ProtocolError::FrameTooLong {
                max: MAX_BODY_LEN,
                actual: body_len,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body_len + FRAME_TRAILER_SIZE);
        buf.extend_from_slice(&FRAME_SYNC);
        let len_bytes = (body_len as u32).to_le_bytes();
        buf.extend_from_slice(&len_bytes);
        buf.put_u8(HEADER_CHECK.checksum(&len_bytes));
        message.encode_body(&mut buf);
        let crc = BODY_CHECK.checksum(&buf[2..]);
        buf.put_u32_le(crc);
        Ok(buf.freeze())
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Iterator returned by [`MessageCodec::drain`].
pub struct Drain<'a> {
    codec: &'a mut MessageCodec,
}

impl Iterator for Drain<'_> {
    type Item = Result<Message, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.codec.decode() {
            DecodeStatus::Success(message) => Some(Ok(message)),
            DecodeStatus::Corrupt(e) => Some(Err(e)),
            DecodeStatus::Incomplete => None,
        }
    }
}

/// Offset of the first byte after position 0 that could begin a frame.
///
/// A lone first sync byte at the very end is kept since its partner may
/// still be in flight.
fn next_sync(buf: &[u8]) -> usize {
    (1..buf.len())
        .find(|&i| buf[i] == FRAME_SYNC[0] && (i + 1 == buf.len() || buf[i + 1] == FRAME_SYNC[1]))
        .unwrap_or(buf.len())
}
