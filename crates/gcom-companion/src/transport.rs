//! Transport seams used by [`crate::CompanionSession`].
//!
//! The session never touches sockets directly. The tokio driver in
//! [`crate::server`] implements these traits over TCP, and tests implement
//! them in memory.

use std::io;
use std::net::IpAddr;

use bytes::Bytes;

/// A listening socket that hands out at most one peer at a time.
pub trait PeerListener {
    /// Connection type produced by this listener.
    type Link: PeerLink;

    /// Bind and start listening.
    fn listen(&mut self, address: IpAddr, port: u16) -> io::Result<()>;

    /// Stop listening and release the socket.
    fn close(&mut self);

    /// Leave further inbound connections queued in the OS backlog.
    fn pause_accepting(&mut self);

    /// Deliver queued and new inbound connections again.
    fn resume_accepting(&mut self);
}

/// An accepted connection to the companion computer.
pub trait PeerLink {
    fn is_connected(&self) -> bool;

    /// Queue a complete frame for writing.
    fn write_frame(&mut self, frame: Bytes) -> io::Result<()>;

    /// Close the connection. Further writes fail.
    fn close(&mut self);
}
