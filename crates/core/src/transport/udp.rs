use std::io;
use std::net::{SocketAddr, UdpSocket};

use super::Transport;
use crate::error::Result;

/// UDP transport for one RTP session.
///
/// Binds an ephemeral socket pair and sends RTP to the client's RTP port
/// and RTCP to its RTCP port (RTP + 1 unless given explicitly). The RTCP
/// socket is non-blocking so the dispatcher can poll it every tick.
///
/// This layer is address-only; it does not know about sessions.
#[derive(Debug)]
pub struct UdpTransport {
    rtp: UdpSocket,
    rtcp: UdpSocket,
    client_rtp: SocketAddr,
    client_rtcp: SocketAddr,
}

impl UdpTransport {
    /// Bind ephemeral sockets towards `client_rtp`, with RTCP on the next port.
    pub fn connect(client_rtp: SocketAddr) -> Result<Self> {
        let mut client_rtcp = client_rtp;
        client_rtcp.set_port(client_rtp.port().wrapping_add(1));
        Self::with_ports(client_rtp, client_rtcp)
    }

    pub fn with_ports(client_rtp: SocketAddr, client_rtcp: SocketAddr) -> Result<Self> {
        let any: SocketAddr = if client_rtp.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let rtp = UdpSocket::bind(any)?;
        let rtcp = UdpSocket::bind(any)?;
        rtcp.set_nonblocking(true)?;
        tracing::debug!(
            client_rtp = %client_rtp,
            client_rtcp = %client_rtcp,
            local_rtp = %rtp.local_addr()?,
            "UDP transport bound"
        );
        Ok(Self {
            rtp,
            rtcp,
            client_rtp,
            client_rtcp,
        })
    }

    /// Local (RTP, RTCP) addresses, for the session-control layer's
    /// `server_port` reply.
    pub fn local_addrs(&self) -> Result<(SocketAddr, SocketAddr)> {
        Ok((self.rtp.local_addr()?, self.rtcp.local_addr()?))
    }

    pub fn client_addrs(&self) -> (SocketAddr, SocketAddr) {
        (self.client_rtp, self.client_rtcp)
    }
}

impl Transport for UdpTransport {
    fn send_packet(&mut self, packet: &[u8]) -> Result<usize> {
        Ok(self.rtp.send_to(packet, self.client_rtp)?)
    }

    fn send_report(&mut self, packet: &[u8]) -> Result<usize> {
        Ok(self.rtcp.send_to(packet, self.client_rtcp)?)
    }

    fn recv_report(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.rtcp.recv_from(buf) {
            Ok((len, from)) => {
                tracing::trace!(from = %from, len, "RTCP received");
                Ok(Some(len))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
