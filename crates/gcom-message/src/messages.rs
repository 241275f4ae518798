//! Message catalog and per-type body layouts.
//!
//! Every body is a one-byte type tag followed by fixed-size little-endian
//! fields and, for some types, a variable-length tail that runs to the end
//! of the frame.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::*;
use crate::error::ProtocolError;
use crate::types::*;

/// Identity and state reported by the companion computer on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    /// Stable identifier of the companion system.
    pub system_id: String,
    /// Software version.
    pub version: u16,
    /// Set when the previous session ended with a dropped connection.
    pub dropped: bool,
}

/// Image with no position metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUntagged {
    /// 8-bit sequence number, wraps 255 -> 0.
    pub sequence: u8,
    /// Encoded image bytes.
    pub image: Bytes,
}

/// Image with the aircraft position and heading at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTagged {
    /// 8-bit sequence number, wraps 255 -> 0.
    pub sequence: u8,
    /// Latitude in degrees x 1e7.
    pub latitude: i32,
    /// Longitude in degrees x 1e7.
    pub longitude: i32,
    /// Altitude above mean sea level in millimetres.
    pub altitude_abs: i32,
    /// Altitude above home in millimetres.
    pub altitude_rel: i32,
    /// Heading in centidegrees.
    pub heading: u16,
    /// Encoded image bytes.
    pub image: Bytes,
}

impl ImageTagged {
    pub fn latitude_deg(&self) -> f64 {
        self.latitude as f64 / COORD_SCALE
    }

    pub fn longitude_deg(&self) -> f64 {
        self.longitude as f64 / COORD_SCALE
    }

    pub fn altitude_abs_m(&self) -> f64 {
        self.altitude_abs as f64 / ALTITUDE_SCALE
    }

    pub fn altitude_rel_m(&self) -> f64 {
        self.altitude_rel as f64 / ALTITUDE_SCALE
    }

    pub fn heading_deg(&self) -> f64 {
        self.heading as f64 / HEADING_SCALE
    }
}

/// Messages exchanged with the companion computer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask the peer to send a message of the given type.
    Request {
        /// Type the peer should reply with.
        target: MessageType,
    },

    /// Peer identity and drop flag.
    SystemInfo(SystemInfo),

    /// Capability bitfield.
    Capabilities(Capabilities),

    /// Command with argument bytes.
    Command {
        /// Command to execute.
        command: CommandCode,
        /// Command-specific arguments.
        args: Vec<u8>,
    },

    /// Result of a command.
    Response {
        /// Command being answered.
        command: CommandCode,
        /// Outcome.
        code: ResponseCode,
    },

    /// Image without metadata.
    ImageUntagged(ImageUntagged),

    /// Geotagged image.
    ImageTagged(ImageTagged),
}

impl Message {
    /// Build a `Request` for the given message type.
    pub fn request(target: MessageType) -> Self {
        Message::Request { target }
    }

    /// Build a `Command` with no arguments.
    pub fn command(command: CommandCode) -> Self {
        Message::Command {
            command,
            args: Vec::new(),
        }
    }

    /// Type tag of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Request { .. } => MessageType::Request,
            Message::SystemInfo(_) => MessageType::SystemInfo,
            Message::Capabilities(_) => MessageType::Capabilities,
            Message::Command { .. } => MessageType::Command,
            Message::Response { .. } => MessageType::Response,
            Message::ImageUntagged(_) => MessageType::ImageUntagged,
            Message::ImageTagged(_) => MessageType::ImageTagged,
        }
    }

    /// Size of the encoded body (tag included).
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Message::Request { .. } => 1,
            Message::SystemInfo(info) => SYSTEM_INFO_HEADER_SIZE + info.system_id.len(),
            Message::Capabilities(_) => 4,
            Message::Command { args, .. } => 1 + args.len(),
            Message::Response { .. } => 2,
            Message::ImageUntagged(img) => 1 + img.image.len(),
            Message::ImageTagged(img) => IMAGE_TAGGED_HEADER_SIZE + img.image.len(),
        }
    }

    /// Append the tag and body to `buf`.
    pub fn encode_body(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u8(self.message_type().tag());

        match self {
            Message::Request { target } => {
                buf.put_u8(target.tag());
            }

            Message::SystemInfo(info) => {
                buf.put_u16_le(info.version);
                buf.put_u8(info.dropped as u8);
                buf.extend_from_slice(info.system_id.as_bytes());
            }

            Message::Capabilities(caps) => {
                buf.put_u32_le(caps.bits());
            }

            Message::Command { command, args } => {
                buf.put_u8((*command).into());
                buf.extend_from_slice(args);
            }

            Message::Response { command, code } => {
                buf.put_u8((*command).into());
                buf.put_u8((*code).into());
            }

            Message::ImageUntagged(img) => {
                buf.put_u8(img.sequence);
                buf.extend_from_slice(&img.image);
            }

            Message::ImageTagged(img) => {
                buf.put_u8(img.sequence);
                buf.put_i32_le(img.latitude);
                buf.put_i32_le(img.longitude);
                buf.put_i32_le(img.altitude_abs);
                buf.put_i32_le(img.altitude_rel);
                buf.put_u16_le(img.heading);
                buf.extend_from_slice(&img.image);
            }
        }
    }

    /// Decode a message from a tag-prefixed body.
    ///
    /// Image payloads are sliced out of `body` without copying.
    pub fn decode_body(body: Bytes) -> Result<Self, ProtocolError> {
        if body.is_empty() {
            return Err(ProtocolError::FrameTooShort {
                expected: 1,
                actual: 0,
            });
        }

        let message_type = MessageType::try_from(body[0])?;
        let data = &body[1..];

        match message_type {
            MessageType::Request => {
                require_len(data, 1)?;
                Ok(Message::Request {
                    target: MessageType::try_from(data[0])?,
                })
            }

            MessageType::SystemInfo => {
                require_len(data, SYSTEM_INFO_HEADER_SIZE)?;
                let version = u16::from_le_bytes([data[0], data[1]]);
                let dropped = match data[2] {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(ProtocolError::InvalidData(format!(
                            "dropped flag must be 0 or 1, got {}",
                            other
                        )))
                    }
                };
                let system_id = std::str::from_utf8(&data[SYSTEM_INFO_HEADER_SIZE..])
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_string();
                Ok(Message::SystemInfo(SystemInfo {
                    system_id,
                    version,
                    dropped,
                }))
            }

            MessageType::Capabilities => {
                require_len(data, 4)?;
                Ok(Message::Capabilities(Capabilities(read_u32(data, 0))))
            }

            MessageType::Command => {
                require_len(data, 1)?;
                Ok(Message::Command {
                    command: CommandCode::try_from(data[0])?,
                    args: data[1..].to_vec(),
                })
            }

            MessageType::Response => {
                require_len(data, 2)?;
                Ok(Message::Response {
                    command: CommandCode::try_from(data[0])?,
                    code: ResponseCode::from(data[1]),
                })
            }

            MessageType::ImageUntagged => {
                require_len(data, 1)?;
                Ok(Message::ImageUntagged(ImageUntagged {
                    sequence: data[0],
                    image: body.slice(2..),
                }))
            }

            MessageType::ImageTagged => {
                require_len(data, IMAGE_TAGGED_HEADER_SIZE)?;
                Ok(Message::ImageTagged(ImageTagged {
                    sequence: data[0],
                    latitude: read_u32(data, 1) as i32,
                    longitude: read_u32(data, 5) as i32,
                    altitude_abs: read_u32(data, 9) as i32,
                    altitude_rel: read_u32(data, 13) as i32,
                    heading: u16::from_le_bytes([data[17], data[18]]),
                    image: body.slice(1 + IMAGE_TAGGED_HEADER_SIZE..),
                }))
            }
        }
    }
}

fn require_len(data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() < expected {
        return Err(ProtocolError::FrameTooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}
