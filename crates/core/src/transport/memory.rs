use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::Transport;
use crate::error::Result;

#[derive(Debug, Default)]
struct Log {
    packets: Vec<Bytes>,
    reports: Vec<Bytes>,
    incoming: VecDeque<Bytes>,
}

/// In-memory transport that keeps every packet it is asked to send.
///
/// Clones share the same log, so a test can hand one clone to a session
/// and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    log: Arc<Mutex<Log>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// RTP packets sent so far.
    pub fn packets(&self) -> Vec<Bytes> {
        self.log.lock().packets.clone()
    }

    /// RTCP packets sent so far.
    pub fn reports(&self) -> Vec<Bytes> {
        self.log.lock().reports.clone()
    }

    /// Queue an RTCP packet as if the client had sent it.
    pub fn inject_report(&self, packet: impl Into<Bytes>) {
        self.log.lock().incoming.push_back(packet.into());
    }
}

impl Transport for MemoryTransport {
    fn send_packet(&mut self, packet: &[u8]) -> Result<usize> {
        self.log.lock().packets.push(Bytes::copy_from_slice(packet));
        Ok(packet.len())
    }

    fn send_report(&mut self, packet: &[u8]) -> Result<usize> {
        self.log.lock().reports.push(Bytes::copy_from_slice(packet));
        Ok(packet.len())
    }

    fn recv_report(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let Some(packet) = self.log.lock().incoming.pop_front() else {
            return Ok(None);
        };
        let len = packet.len().min(buf.len());
        buf[..len].copy_from_slice(&packet[..len]);
        Ok(Some(len))
    }
}
