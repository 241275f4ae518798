//! MAVLink framing errors.

use thiserror::Error;

/// Reasons a decode attempt discarded bytes, or an encode was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MavlinkError {
    /// Bytes that cannot start a frame were skipped.
    #[error("skipped {skipped} bytes before frame start")]
    NoSync {
        /// Number of bytes discarded.
        skipped: usize,
    },

    /// X.25 checksum did not match.
    #[error("checksum mismatch on message {msg_id}: expected 0x{expected:04X}, got 0x{actual:04X}")]
    BadChecksum {
        /// Message id from the header.
        msg_id: u32,
        /// Checksum computed over the frame.
        expected: u16,
        /// Checksum present in the frame.
        actual: u16,
    },

    /// Message id is not part of the dialect, or the frame uses unsupported flags.
    #[error("unsupported message id {msg_id}")]
    Unsupported {
        /// Message id from the header.
        msg_id: u32,
    },

    /// Checksum was valid but the payload did not parse.
    #[error("malformed payload for message {msg_id}: {reason}")]
    Malformed {
        /// Message id from the header.
        msg_id: u32,
        /// Parser error text.
        reason: String,
    },

    /// Payload longer than a MAVLink frame can carry.
    #[error("payload too long: maximum {max} bytes, got {actual}")]
    PayloadTooLong {
        /// Maximum payload size.
        max: usize,
        /// Actual length.
        actual: usize,
    },
}
