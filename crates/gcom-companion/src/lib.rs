//! Companion computer link.
//!
//! [`CompanionSession`] is a sans-IO state machine over the [`PeerListener`]
//! and [`PeerLink`] seams. It enforces a single active peer, negotiates
//! resume or reset with a returning peer, and republishes every decoded
//! message as a [`CompanionEvent`]. [`server::CompanionHandle`] drives a
//! session over TCP on a tokio runtime.
//!
//! ```rust,ignore
//! use gcom_companion::server::CompanionHandle;
//!
//! let (companion, _task) = CompanionHandle::spawn(true);
//! let events = companion.subscribe().await.unwrap();
//! companion.start("0.0.0.0".parse()?, gcom_companion::DEFAULT_COMPANION_PORT).await;
//! ```

mod sequence;
mod session;
mod transport;

pub mod server;

pub use sequence::*;
pub use session::*;
pub use transport::*;
