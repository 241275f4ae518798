//! Outbound transport seam for the autopilot relay.

use std::io;

use bytes::Bytes;

/// Socket state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    Unconnected,
    HostLookup,
    Connecting,
    Connected,
    Closing,
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketState::Unconnected => write!(f, "unconnected"),
            SocketState::HostLookup => write!(f, "host lookup"),
            SocketState::Connecting => write!(f, "connecting"),
            SocketState::Connected => write!(f, "connected"),
            SocketState::Closing => write!(f, "closing"),
        }
    }
}

/// Client connection to the autopilot bridge.
///
/// `connect` only begins an attempt. Progress is reported back to the relay
/// through its `handle_state_changed` callback.
pub trait AutopilotLink {
    fn state(&self) -> SocketState;

    fn connect(&mut self, address: &str, port: u16);

    /// Drop the connection or abandon an attempt. Reports nothing back.
    fn disconnect(&mut self);

    /// Queue a frame for sending. Fails unless connected.
    fn write(&mut self, frame: Bytes) -> io::Result<()>;
}
