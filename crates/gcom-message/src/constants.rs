//! Protocol constants
//!
//! Frame markers, message type tags, command codes and response codes used on
//! the companion link.

// ============================================================================
// Framing
// ============================================================================

/// Two-byte marker that starts every frame.
pub const FRAME_SYNC: [u8; 2] = [0x55, 0xAA];
/// Sync marker, body length (u32) and header check byte.
pub const FRAME_HEADER_SIZE: usize = 2 + 4 + 1;
/// CRC-32 trailer.
pub const FRAME_TRAILER_SIZE: usize = 4;
/// Largest accepted body (type tag plus payload).
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

// ============================================================================
// Message Type Tags
// ============================================================================

/// Ask the peer to send a message of the given type.
pub const MSG_TYPE_REQUEST: u8 = 0x00;
/// Peer identity, software version and drop flag.
pub const MSG_TYPE_SYSTEM_INFO: u8 = 0x01;
/// Capability bitfield.
pub const MSG_TYPE_CAPABILITIES: u8 = 0x02;
/// Command with optional argument bytes.
pub const MSG_TYPE_COMMAND: u8 = 0x03;
/// Result of a previously sent command.
pub const MSG_TYPE_RESPONSE: u8 = 0x04;
/// Image without position metadata.
pub const MSG_TYPE_IMAGE_UNTAGGED: u8 = 0x05;
/// Image with position and attitude metadata.
pub const MSG_TYPE_IMAGE_TAGGED: u8 = 0x06;

// ============================================================================
// Command Codes
// ============================================================================

/// Discard any interrupted work and start from a clean state.
pub const CMD_SYSTEM_RESET: u8 = 0;
/// Continue the work that was in progress when the link dropped.
pub const CMD_SYSTEM_RESUME: u8 = 1;
/// Start relaying images. One argument byte: frequency in tenths of a hertz.
pub const CMD_IMAGE_RELAY_START: u8 = 2;
/// Stop relaying images.
pub const CMD_IMAGE_RELAY_STOP: u8 = 3;

// ============================================================================
// Response Codes
// ============================================================================

pub const RESP_CODE_NO_ERROR: u8 = 0;
pub const RESP_CODE_UNKNOWN_COMMAND: u8 = 1;
pub const RESP_CODE_INVALID_ARGUMENTS: u8 = 2;
pub const RESP_CODE_SYSTEM_BUSY: u8 = 3;
pub const RESP_CODE_RESUME_FAILED: u8 = 4;

// ============================================================================
// Capability Bits
// ============================================================================

/// Peer can deliver geotagged images.
pub const CAP_TAGGED_CAMERA: u32 = 1 << 0;
/// Peer can deliver images without metadata.
pub const CAP_UNTAGGED_CAMERA: u32 = 1 << 1;

// ============================================================================
// Image Metadata Scaling
// ============================================================================

/// Raw latitude/longitude units per degree.
pub const COORD_SCALE: f64 = 1e7;
/// Raw altitude units (millimetres) per metre.
pub const ALTITUDE_SCALE: f64 = 1000.0;
/// Raw heading units (centidegrees) per degree.
pub const HEADING_SCALE: f64 = 100.0;

/// Fixed-size prefix of an ImageTagged body: sequence, lat, lon, alt_abs, alt_rel, heading.
pub const IMAGE_TAGGED_HEADER_SIZE: usize = 1 + 4 + 4 + 4 + 4 + 2;
/// Fixed-size prefix of a SystemInfo body: version and dropped flag.
pub const SYSTEM_INFO_HEADER_SIZE: usize = 2 + 1;
