//! MAVLink stream framing for the autopilot link.
//!
//! The `mavlink` crate supplies the ardupilotmega dialect: message structs,
//! payload serialization and per-message CRC_EXTRA values. This crate adds
//! a buffered, transactional framer on top so a read event can drain every
//! complete frame and resynchronize after corruption without blocking on
//! a reader.
//!
//! # Example
//!
//! ```rust,ignore
//! use gcom_mavlink::{MavlinkCodec, MavlinkEncoder};
//!
//! let mut encoder = MavlinkEncoder::new(2, 1);
//! socket.write_all(&encoder.encode(&message))?;
//!
//! let mut codec = MavlinkCodec::new();
//! codec.push(&received);
//! for frame in codec.drain() {
//!     if let Ok((header, message)) = frame {
//!         dispatch(header, message);
//!     }
//! }
//! ```

mod codec;
mod error;

pub use codec::*;
pub use error::*;

pub use mavlink;
pub use mavlink::ardupilotmega as dialect;
