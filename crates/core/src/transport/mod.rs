//! Network transport seam for RTP delivery.
//!
//! The core only needs three things from a connected endpoint: send one RTP
//! packet, send one RTCP compound packet, and poll for incoming RTCP. How
//! those bytes travel (plain UDP, interleaved TCP, encrypted sockets) is up
//! to the implementation.
//!
//! - **UDP** ([`udp`]): one socket pair per session, RTCP on port + 1
//!   (RFC 3550 §11).
//! - **Memory** ([`memory`]): records everything it is asked to send; used
//!   by tests and dry runs.

pub mod memory;
pub mod udp;

pub use memory::MemoryTransport;
pub use udp::UdpTransport;

use crate::error::Result;

/// Connected endpoint of one RTP session.
pub trait Transport: Send {
    /// Send one complete RTP packet (header and payload).
    fn send_packet(&mut self, packet: &[u8]) -> Result<usize>;

    /// Send one RTCP compound packet.
    fn send_report(&mut self, packet: &[u8]) -> Result<usize>;

    /// Receive one pending RTCP packet without blocking.
    ///
    /// `Ok(None)` means nothing is waiting.
    fn recv_report(&mut self, _buf: &mut [u8]) -> Result<Option<usize>> {
        Ok(None)
    }
}
