//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when encoding or decoding a message body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Body is too short for its message type.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Body exceeds the largest encodable frame.
    #[error("frame too long: maximum {max} bytes, got {actual}")]
    FrameTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length.
        actual: usize,
    },

    /// Unknown message type tag.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// Unknown command code.
    #[error("unknown command code: 0x{0:02X}")]
    UnknownCommand(u8),

    /// Invalid data in frame.
    #[error("invalid frame data: {0}")]
    InvalidData(String),

    /// UTF-8 decoding error.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Reasons a decode attempt discarded bytes from the stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Bytes that cannot start a frame were skipped.
    #[error("skipped {skipped} bytes before frame sync")]
    NoSync {
        /// Number of bytes discarded.
        skipped: usize,
    },

    /// Length field failed its check byte.
    #[error("header check mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    BadHeaderCheck {
        /// Check byte computed from the length field.
        expected: u8,
        /// Check byte present in the frame.
        actual: u8,
    },

    /// Length field is zero or larger than the body limit.
    #[error("invalid body length: {0}")]
    BadLength(u32),

    /// Trailer checksum does not match the frame contents.
    #[error("checksum mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    BadChecksum {
        /// Checksum computed over the frame.
        expected: u32,
        /// Checksum present in the trailer.
        actual: u32,
    },

    /// Frame was intact but its body did not decode.
    #[error("malformed body: {0}")]
    Malformed(#[from] ProtocolError),
}
