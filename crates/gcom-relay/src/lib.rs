//! Autopilot relay.
//!
//! [`AutopilotRelay`] is a MAVLink client of the autopilot bridge written as
//! a sans-IO state machine over the [`AutopilotLink`] seam. It issues flight
//! commands, uploads missions on the autopilot's request, and republishes
//! telemetry and acknowledgements as [`RelayEvent`]s.
//! [`client::RelayHandle`] drives a relay over TCP on a tokio runtime.
//!
//! ```rust,ignore
//! use gcom_relay::client::RelayHandle;
//! use gcom_relay::{FlightMode, Waypoint};
//!
//! let (relay, _task) = RelayHandle::spawn();
//! let events = relay.subscribe().await.unwrap();
//! relay.configure("127.0.0.1", gcom_relay::DEFAULT_AUTOPILOT_PORT);
//! relay.start().await;
//! // ... after RelayEvent::Connected
//! relay.write_mission(40.0, vec![Waypoint::new(38.1462, -76.4281, 100.0)], 15.0).await;
//! ```

mod mission;
mod modes;
mod relay;
mod transport;

pub mod client;

pub use mission::*;
pub use modes::*;
pub use relay::*;
pub use transport::*;
