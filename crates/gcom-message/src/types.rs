//! Common types used in the protocol.

use crate::constants::*;
use crate::error::ProtocolError;

/// Numeric tag identifying each message variant on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Request,
    SystemInfo,
    Capabilities,
    Command,
    Response,
    ImageUntagged,
    ImageTagged,
}

impl MessageType {
    /// Wire tag for this type.
    pub const fn tag(self) -> u8 {
        match self {
            MessageType::Request => MSG_TYPE_REQUEST,
            MessageType::SystemInfo => MSG_TYPE_SYSTEM_INFO,
            MessageType::Capabilities => MSG_TYPE_CAPABILITIES,
            MessageType::Command => MSG_TYPE_COMMAND,
            MessageType::Response => MSG_TYPE_RESPONSE,
            MessageType::ImageUntagged => MSG_TYPE_IMAGE_UNTAGGED,
            MessageType::ImageTagged => MSG_TYPE_IMAGE_TAGGED,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            MSG_TYPE_REQUEST => Ok(MessageType::Request),
            MSG_TYPE_SYSTEM_INFO => Ok(MessageType::SystemInfo),
            MSG_TYPE_CAPABILITIES => Ok(MessageType::Capabilities),
            MSG_TYPE_COMMAND => Ok(MessageType::Command),
            MSG_TYPE_RESPONSE => Ok(MessageType::Response),
            MSG_TYPE_IMAGE_UNTAGGED => Ok(MessageType::ImageUntagged),
            MSG_TYPE_IMAGE_TAGGED => Ok(MessageType::ImageTagged),
            _ => Err(ProtocolError::UnknownMessageType(tag)),
        }
    }
}

/// Commands the ground station can issue to the companion computer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// Discard interrupted work.
    SystemReset,
    /// Continue interrupted work.
    SystemResume,
    /// Begin relaying images.
    ImageRelayStart,
    /// Stop relaying images.
    ImageRelayStop,
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandCode::SystemReset => write!(f, "SYSTEM_RESET"),
            CommandCode::SystemResume => write!(f, "SYSTEM_RESUME"),
            CommandCode::ImageRelayStart => write!(f, "IMAGE_RELAY_START"),
            CommandCode::ImageRelayStop => write!(f, "IMAGE_RELAY_STOP"),
        }
    }
}

impl TryFrom<u8> for CommandCode {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            CMD_SYSTEM_RESET => Ok(CommandCode::SystemReset),
            CMD_SYSTEM_RESUME => Ok(CommandCode::SystemResume),
            CMD_IMAGE_RELAY_START => Ok(CommandCode::ImageRelayStart),
            CMD_IMAGE_RELAY_STOP => Ok(CommandCode::ImageRelayStop),
            _ => Err(ProtocolError::UnknownCommand(code)),
        }
    }
}

impl From<CommandCode> for u8 {
    fn from(code: CommandCode) -> Self {
        match code {
            CommandCode::SystemReset => CMD_SYSTEM_RESET,
            CommandCode::SystemResume => CMD_SYSTEM_RESUME,
            CommandCode::ImageRelayStart => CMD_IMAGE_RELAY_START,
            CommandCode::ImageRelayStop => CMD_IMAGE_RELAY_STOP,
        }
    }
}

/// Result codes carried by a Response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// Command completed.
    NoError,
    /// Peer did not recognize the command.
    UnknownCommand,
    /// Command arguments were rejected.
    InvalidArguments,
    /// Peer cannot accept the command right now.
    SystemBusy,
    /// Interrupted work could not be resumed.
    ResumeFailed,
    /// Unknown response code.
    Unknown(u8),
}

impl ResponseCode {
    /// True for every code except [`ResponseCode::NoError`].
    pub fn is_error(self) -> bool {
        self != ResponseCode::NoError
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseCode::NoError => write!(f, "no error"),
            ResponseCode::UnknownCommand => write!(f, "unknown command"),
            ResponseCode::InvalidArguments => write!(f, "invalid arguments"),
            ResponseCode::SystemBusy => write!(f, "system busy"),
            ResponseCode::ResumeFailed => write!(f, "resume failed"),
            ResponseCode::Unknown(code) => write!(f, "unknown response (0x{:02X})", code),
        }
    }
}

impl From<u8> for ResponseCode {
    fn from(code: u8) -> Self {
        match code {
            RESP_CODE_NO_ERROR => ResponseCode::NoError,
            RESP_CODE_UNKNOWN_COMMAND => ResponseCode::UnknownCommand,
            RESP_CODE_INVALID_ARGUMENTS => ResponseCode::InvalidArguments,
            RESP_CODE_SYSTEM_BUSY => ResponseCode::SystemBusy,
            RESP_CODE_RESUME_FAILED => ResponseCode::ResumeFailed,
            _ => ResponseCode::Unknown(code),
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(code: ResponseCode) -> Self {
        match code {
            ResponseCode::NoError => RESP_CODE_NO_ERROR,
            ResponseCode::UnknownCommand => RESP_CODE_UNKNOWN_COMMAND,
            ResponseCode::InvalidArguments => RESP_CODE_INVALID_ARGUMENTS,
            ResponseCode::SystemBusy => RESP_CODE_SYSTEM_BUSY,
            ResponseCode::ResumeFailed => RESP_CODE_RESUME_FAILED,
            ResponseCode::Unknown(code) => code,
        }
    }
}

/// Capability bitfield advertised by the companion computer.
///
/// Several bits may be set at once. Bits without a named constant are kept
/// so they survive a decode/encode pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(pub u32);

impl Capabilities {
    pub const TAGGED_CAMERA: Capabilities = Capabilities(CAP_TAGGED_CAMERA);
    pub const UNTAGGED_CAMERA: Capabilities = Capabilities(CAP_UNTAGGED_CAMERA);

    /// Raw bitfield.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set.
    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn has_tagged_camera(self) -> bool {
        self.contains(Self::TAGGED_CAMERA)
    }

    pub fn has_untagged_camera(self) -> bool {
        self.contains(Self::UNTAGGED_CAMERA)
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities(self.0 | rhs.0)
    }
}
