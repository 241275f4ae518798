//! Ground Station Companion Link Protocol
//!
//! This crate provides the message catalog and frame codec used between the
//! ground station and the companion computer on board the aircraft.
//!
//! # Protocol Overview
//!
//! The link carries a closed set of messages. Each one is wrapped in a frame
//! with a sync marker, a checked length and a CRC-32 trailer so a receiver
//! reading an arbitrary byte stream can find frame boundaries, detect damage
//! and skip it without losing later frames.
//!
//! - **Request**: ask the peer for a SystemInfo or Capabilities message
//! - **SystemInfo / Capabilities**: peer identity and feature bits
//! - **Command / Response**: control with explicit result codes
//! - **ImageTagged / ImageUntagged**: imagery with an 8-bit sequence number
//!
//! # Example
//!
//! ```rust,ignore
//! use gcom_message::{DecodeStatus, Message, MessageCodec, MessageType};
//!
//! let frame = MessageCodec::encode(&Message::request(MessageType::SystemInfo))?;
//!
//! let mut codec = MessageCodec::new();
//! codec.push(&received_bytes);
//! for outcome in codec.drain() {
//!     match outcome {
//!         Ok(message) => handle(message),
//!         Err(e) => log::debug!("dropped corrupt bytes: {}", e),
//!     }
//! }
//! ```

mod constants;
mod error;
mod frame;
mod messages;
mod types;

pub use constants::*;
pub use error::*;
pub use frame::*;
pub use messages::*;
pub use types::*;
