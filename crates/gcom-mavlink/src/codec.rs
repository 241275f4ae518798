//! MAVLink v1/v2 stream framing.
//!
//! ```text
//! v1: FE | len | seq | sys | comp | msgid          | payload | crc16
//! v2: FD | len | incompat | compat | seq | sys | comp | msgid(3) | payload | crc16 | [signature 13]
//! ```
//!
//! The checksum is CRC-16/MCRF4XX (the MAVLink "X.25" CRC) over everything
//! after the start byte, followed by the per-message CRC_EXTRA byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_MCRF4XX};
use mavlink::ardupilotmega::MavMessage;
use mavlink::error::ParserError;
use mavlink::{MavHeader, MavlinkVersion, Message};

use crate::error::MavlinkError;

/// Start byte of a MAVLink 1 frame.
pub const MAV_STX_V1: u8 = 0xFE;
/// Start byte of a MAVLink 2 frame.
pub const MAV_STX_V2: u8 = 0xFD;
/// Largest payload either version can carry.
pub const MAX_PAYLOAD_LEN: usize = 255;

const V1_HEADER_LEN: usize = 6;
const V2_HEADER_LEN: usize = 10;
const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

const X25: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);

/// Outcome of a single decode attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameStatus {
    /// A complete frame was consumed and parsed.
    Success(MavHeader, MavMessage),
    /// Not enough bytes yet. Nothing was consumed.
    Incomplete,
    /// Bytes were discarded. Try again.
    Corrupt(MavlinkError),
}

/// Transactional MAVLink decoder over a buffered byte stream.
#[derive(Debug, Default)]
pub struct MavlinkCodec {
    buffer: BytesMut,
}

impl MavlinkCodec {
    pub fn new() -> Self {
        MavlinkCodec {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempt to decode one frame from the front of the buffer.
    pub fn decode(&mut self) -> FrameStatus {
        let Some(&stx) = self.buffer.first() else {
            return FrameStatus::Incomplete;
        };

        let version = match stx {
            MAV_STX_V1 => MavlinkVersion::V1,
            MAV_STX_V2 => MavlinkVersion::V2,
            _ => {
                let skipped = self
                    .buffer
                    .iter()
                    .position(|&b| b == MAV_STX_V1 || b == MAV_STX_V2)
                    .unwrap_or(self.buffer.len());
                self.buffer.advance(skipped);
                log::trace!("skipped {} bytes looking for a MAVLink start byte", skipped);
                return FrameStatus::Corrupt(MavlinkError::NoSync { skipped });
            }
        };

        let header_len = match version {
            MavlinkVersion::V1 => V1_HEADER_LEN,
            MavlinkVersion::V2 => V2_HEADER_LEN,
        };
        if self.buffer.len() < header_len {
            return FrameStatus::Incomplete;
        }

        let payload_len = self.buffer[1] as usize;
        let (incompat, sequence, system_id, component_id, msg_id) = match version {
            MavlinkVersion::V1 => (0, self.buffer[2], self.buffer[3], self.buffer[4], self.buffer[5] as u32),
            MavlinkVersion::V2 => (
                self.buffer[2],
                self.buffer[4],
                self.buffer[5],
                self.buffer[6],
                u32::from_le_bytes([self.buffer[7], self.buffer[8], self.buffer[9], 0]),
            ),
        };

        let checked_end = header_len + payload_len;
        let signature_len = if incompat & INCOMPAT_FLAG_SIGNED != 0 {
            SIGNATURE_LEN
        } else {
            0
        };
        let total = checked_end + CHECKSUM_LEN + signature_len;
        if self.buffer.len() < total {
            return FrameStatus::Incomplete;
        }

        let mut digest = X25.digest();
        digest.update(&self.buffer[1..checked_end]);
        digest.update(&[MavMessage::extra_crc(msg_id)]);
        let expected = digest.finalize();
        let actual = u16::from_le_bytes([self.buffer[checked_end], self.buffer[checked_end + 1]]);

        if expected != actual {
            // The length byte is unverified, so only the start byte can be
            // discarded.
            self.buffer.advance(1);
            return FrameStatus::Corrupt(MavlinkError::BadChecksum {
                msg_id,
                expected,
                actual,
            });
        }

        let frame = self.buffer.split_to(total);
        if incompat & !INCOMPAT_FLAG_SIGNED != 0 {
            return FrameStatus::Corrupt(MavlinkError::Unsupported { msg_id });
        }

        let header = MavHeader {
            system_id,
            component_id,
            sequence,
        };
        match MavMessage::parse(version, msg_id, &frame[header_len..checked_end]) {
            Ok(message) => FrameStatus::Success(header, message),
            Err(ParserError::UnknownMessage { .. }) => {
                log::trace!("skipped {} byte frame with unknown id {}", total, msg_id);
                FrameStatus::Corrupt(MavlinkError::Unsupported { msg_id })
            }
            Err(e) => FrameStatus::Corrupt(MavlinkError::Malformed {
                msg_id,
                reason: e.to_string(),
            }),
        }
    }

    /// Decode every complete frame currently buffered.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { codec: self }
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

/// Iterator returned by [`MavlinkCodec::drain`].
pub struct Drain<'a> {
    codec: &'a mut MavlinkCodec,
}

impl Iterator for Drain<'_> {
    type Item = Result<(MavHeader, MavMessage), MavlinkError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.codec.decode() {
            FrameStatus::Success(header, message) => Some(Ok((header, message))),
            FrameStatus::Corrupt(e) => Some(Err(e)),
            FrameStatus::Incomplete => None,
        }
    }
}

/// Builds outgoing MAVLink 2 frames with a running sequence number.
#[derive(Debug, Clone)]
pub struct MavlinkEncoder {
    system_id: u8,
    component_id: u8,
    sequence: u8,
}

impl MavlinkEncoder {
    /// Create an encoder that identifies itself with the given ids.
    pub fn new(system_id: u8, component_id: u8) -> Self {
        Self {
            system_id,
            component_id,
            sequence: 0,
        }
    }

    pub fn system_id(&self) -> u8 {
        self.system_id
    }

    pub fn component_id(&self) -> u8 {
        self.component_id
    }

    /// Sequence number the next frame will carry.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Serialize a typed message.
    pub fn encode(&mut self, message: &MavMessage) -> Bytes {
        let mut payload = [0u8; MAX_PAYLOAD_LEN];
        let len = message.ser(MavlinkVersion::V2, &mut payload);
        self.frame(message.message_id(), &payload[..len])
    }

    /// Serialize a pre-built payload for `msg_id`.
    ///
    /// Used where the typed form cannot carry the required field values.
    pub fn encode_raw(&mut self, msg_id: u32, payload: &[u8]) -> Result<Bytes, MavlinkError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(MavlinkError::PayloadTooLong {
                max: MAX_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        Ok(self.frame(msg_id, payload))
    }

    fn frame(&mut self, msg_id: u32, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(V2_HEADER_LEN + payload.len() + CHECKSUM_LEN);
        buf.put_u8(MAV_STX_V2);
        buf.put_u8(payload.len() as u8);
        buf.put_u8(0); // incompat flags
        buf.put_u8(0); // compat flags
        buf.put_u8(self.sequence);
        buf.put_u8(self.system_id);
        buf.put_u8(self.component_id);
        buf.extend_from_slice(&msg_id.to_le_bytes()[..3]);
        buf.extend_from_slice(payload);

        let mut digest = X25.digest();
        digest.update(&buf[1..]);
        digest.update(&[MavMessage::extra_crc(msg_id)]);
        buf.put_u16_le(digest.finalize());

        self.sequence = self.sequence.wrapping_add(1);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::ardupilotmega::{
        MavAutopilot, MavModeFlag, MavState, MavType, HEARTBEAT_DATA, MISSION_REQUEST_INT_DATA,
    };

    fn heartbeat() -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 5,
            mavtype: MavType::MAV_TYPE_FIXED_WING,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        })
    }

    fn v1_frame(seq: u8, sys: u8, comp: u8, message: &MavMessage) -> Vec<u8> {
        let mut payload = [0u8; MAX_PAYLOAD_LEN];
        let len = message.ser(MavlinkVersion::V1, &mut payload);
        let msg_id = message.message_id();
        let mut frame = vec![MAV_STX_V1, len as u8, seq, sys, comp, msg_id as u8];
        frame.extend_from_slice(&payload[..len]);
        let mut digest = X25.digest();
        digest.update(&frame[1..]);
        digest.update(&[MavMessage::extra_crc(msg_id)]);
        frame.extend_from_slice(&digest.finalize().to_le_bytes());
        frame
    }

    #[test]
    fn test_checksum_vector() {
        assert_eq!(X25.checksum(b"123456789"), 0x6F91);
    }

    #[test]
    fn test_v2_round_trip_and_sequence() {
        let mut encoder = MavlinkEncoder::new(2, 1);
        let mut codec = MavlinkCodec::new();
        codec.push(&encoder.encode(&heartbeat()));
        codec.push(&encoder.encode(&heartbeat()));
        assert_eq!(encoder.sequence(), 2);

        let decoded: Vec<_> = codec.drain().collect();
        assert_eq!(decoded.len(), 2);
        let (header, message) = decoded[1].clone().unwrap();
        assert_eq!(header.system_id, 2);
        assert_eq!(header.component_id, 1);
        assert_eq!(header.sequence, 1);
        assert_eq!(message, heartbeat());
    }

    #[test]
    fn test_v1_frame_decodes() {
        let mut codec = MavlinkCodec::new();
        codec.push(&v1_frame(9, 1, 1, &heartbeat()));
        match codec.decode() {
            FrameStatus::Success(header, message) => {
                assert_eq!(header.sequence, 9);
                assert_eq!(message, heartbeat());
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[test]
    fn test_partial_frame_is_incomplete() {
        let mut encoder = MavlinkEncoder::new(2, 1);
        let frame = encoder.encode(&heartbeat());
        let mut codec = MavlinkCodec::new();

        codec.push(&frame[..5]);
        assert_eq!(codec.decode(), FrameStatus::Incomplete);
        codec.push(&frame[5..frame.len() - 1]);
        assert_eq!(codec.decode(), FrameStatus::Incomplete);
        assert_eq!(codec.buffered_len(), frame.len() - 1);
        codec.push(&frame[frame.len() - 1..]);
        assert!(matches!(codec.decode(), FrameStatus::Success(..)));
    }

    #[test]
    fn test_bad_checksum_resyncs_to_next_frame() {
        let mut encoder = MavlinkEncoder::new(2, 1);
        let mut damaged = encoder.encode(&heartbeat()).to_vec();
        let crc_at = damaged.len() - CHECKSUM_LEN;
        damaged[crc_at] = 0x00;
        damaged[crc_at + 1] = 0x00;

        let mut codec = MavlinkCodec::new();
        codec.push(&[0x00, 0x42]);
        codec.push(&damaged);
        codec.push(&encoder.encode(&heartbeat()));

        let outcomes: Vec<_> = codec.drain().collect();
        assert_eq!(outcomes[0], Err(MavlinkError::NoSync { skipped: 2 }));
        assert!(matches!(outcomes[1], Err(MavlinkError::BadChecksum { .. })));
        let successes: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].1, heartbeat());
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_signed_frame_skips_signature() {
        let mut encoder = MavlinkEncoder::new(1, 1);
        let request = MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
            seq: 4,
            target_system: 2,
            target_component: 1,
            ..Default::default()
        });
        let mut frame = encoder.encode(&request).to_vec();
        frame[2] = INCOMPAT_FLAG_SIGNED;
        // Recompute the checksum since the incompat byte is covered by it.
        let checked_end = frame.len() - CHECKSUM_LEN;
        let mut digest = X25.digest();
        digest.update(&frame[1..checked_end]);
        digest.update(&[MavMessage::extra_crc(request.message_id())]);
        let crc = digest.finalize().to_le_bytes();
        frame[checked_end] = crc[0];
        frame[checked_end + 1] = crc[1];
        frame.extend_from_slice(&[0xAB; SIGNATURE_LEN]);

        let mut codec = MavlinkCodec::new();
        codec.push(&frame);
        assert!(matches!(codec.decode(), FrameStatus::Success(_, MavMessage::MISSION_REQUEST_INT(_))));
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_stray_start_byte_keeps_following_frames() {
        let mut encoder = MavlinkEncoder::new(1, 1);
        for _ in 0..3 {
            encoder.encode(&heartbeat());
        }
        let mut codec = MavlinkCodec::new();
        codec.push(&[MAV_STX_V1]);
        for _ in 0..15 {
            codec.push(&encoder.encode(&heartbeat()));
        }

        let (decoded, errors): (Vec<_>, Vec<_>) = codec.drain().partition(|r| r.is_ok());
        assert_eq!(decoded.len(), 15);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Err(MavlinkError::BadChecksum { .. })));
        assert_eq!(codec.buffered_len(), 0);
        for (expected, result) in (3u8..).zip(decoded) {
            let (header, message) = result.unwrap();
            assert_eq!(header.sequence, expected);
            assert_eq!(message, heartbeat());
        }
    }

    #[test]
    fn test_stray_v2_start_byte_before_partial_frame() {
        let mut encoder = MavlinkEncoder::new(1, 1);
        let frame = encoder.encode(&heartbeat());
        let mut codec = MavlinkCodec::new();
        codec.push(&[MAV_STX_V2]);
        codec.push(&frame);

        // The bogus length claims more bytes than are buffered.
        assert_eq!(codec.decode(), FrameStatus::Incomplete);
        codec.push(&[0u8; 260]);
        assert!(matches!(codec.decode(), FrameStatus::Corrupt(MavlinkError::BadChecksum { .. })));
        assert!(matches!(codec.decode(), FrameStatus::Success(_, MavMessage::HEARTBEAT(_))));
    }

    #[test]
    fn test_verified_unknown_message_id_consumed_whole() {
        let mut encoder = MavlinkEncoder::new(1, 1);
        let frame = encoder.encode_raw(0x00_FF_FF, &[1, 2, 3, 4]).unwrap();

        let mut codec = MavlinkCodec::new();
        codec.push(&frame);
        codec.push(&encoder.encode(&heartbeat()));

        assert_eq!(codec.decode(), FrameStatus::Corrupt(MavlinkError::Unsupported { msg_id: 0xFFFF }));
        assert!(matches!(codec.decode(), FrameStatus::Success(..)));
    }

    #[test]
    fn test_encode_raw_rejects_oversized_payload() {
        let mut encoder = MavlinkEncoder::new(2, 1);
        assert_eq!(
            encoder.encode_raw(11, &[0u8; 256]),
            Err(MavlinkError::PayloadTooLong { max: 255, actual: 256 })
        );
        assert_eq!(encoder.sequence(), 0);
    }
}
