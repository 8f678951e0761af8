//! RTCP statistics and packets (RFC 3550 §6).
//!
//! Every RTP session keeps one [`PeerStats`] for itself ([`Peer::Server`]:
//! what it sent) and one for the remote end ([`Peer::Client`]: what the
//! client reported back in SR/RR report blocks).
//!
//! ## Report block (RFC 3550 §6.4.1)
//!
//! ```text
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |                 SSRC_1 (SSRC of first source)                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | fraction lost |       cumulative number of packets lost       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           extended highest sequence number received           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      interarrival jitter                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         last SR (LSR)                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   delay since last SR (DLSR)                  |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! ```

use std::ops::{Index, IndexMut};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{PlayoutError, Result};

pub const PT_SR: u8 = 200;
pub const PT_RR: u8 = 201;
pub const PT_SDES: u8 = 202;
pub const PT_BYE: u8 = 203;
pub const PT_APP: u8 = 204;

const SDES_CNAME: u8 = 1;
const HEADER_LEN: usize = 4;
const REPORT_BLOCK_LEN: usize = 24;
/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Which end of the session a statistics record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    Server,
    Client,
}

/// Counters for one end of an RTP session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub ssrc: u32,
    /// RTP packets sent (server) or reported sent in an SR (client).
    pub pkt_count: u32,
    pub octet_count: u32,
    /// Fraction lost as the raw 8-bit fixed-point value (x/256).
    pub fract_lost: u8,
    /// Cumulative packets lost (signed 24-bit on the wire).
    pub pkt_lost: i32,
    pub highest_seq: u32,
    /// Interarrival jitter in timestamp units.
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
    pub rr_received: u32,
    pub sr_received: u32,
}

impl PeerStats {
    /// Fraction of packets lost since the previous report, 0.0 to 1.0.
    pub fn fraction_lost(&self) -> f64 {
        self.fract_lost as f64 / 256.0
    }

    fn apply_report_block(&mut self, block: &[u8]) {
        let lost = u32::from_be_bytes([0, block[5], block[6], block[7]]);
        self.fract_lost = block[4];
        // sign-extend the 24-bit cumulative count
        self.pkt_lost = ((lost << 8) as i32) >> 8;
        self.highest_seq = be_u32(block, 8);
        self.jitter = be_u32(block, 12);
        self.last_sr = be_u32(block, 16);
        self.delay_since_last_sr = be_u32(block, 20);
    }
}

/// Per-session RTCP statistics, indexed by [`Peer`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtcpStats {
    server: PeerStats,
    client: PeerStats,
}

impl RtcpStats {
    /// Forget how many reports were received (used when playback starts).
    pub fn reset_received(&mut self) {
        for peer in [Peer::Server, Peer::Client] {
            self[peer].rr_received = 0;
            self[peer].sr_received = 0;
        }
    }

    /// Count one RTP packet of `octets` payload bytes sent by the server.
    pub fn record_sent(&mut self, octets: usize) {
        let server = &mut self[Peer::Server];
        server.pkt_count = server.pkt_count.wrapping_add(1);
        server.octet_count = server.octet_count.wrapping_add(octets as u32);
    }
}

impl Index<Peer> for RtcpStats {
    type Output = PeerStats;

    fn index(&self, peer: Peer) -> &PeerStats {
        match peer {
            Peer::Server => &self.server,
            Peer::Client => &self.client,
        }
    }
}

impl IndexMut<Peer> for RtcpStats {
    fn index_mut(&mut self, peer: Peer) -> &mut PeerStats {
        match peer {
            Peer::Server => &mut self.server,
            Peer::Client => &mut self.client,
        }
    }
}

fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Fold a received compound RTCP packet into `stats`.
///
/// SR and RR report blocks update the client record; SDES, BYE and APP are
/// recognised and skipped. Returns the number of packets processed.
pub fn parse_compound(data: &[u8], stats: &mut RtcpStats) -> Result<usize> {
    let mut offset = 0usize;
    let mut packets = 0usize;
    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < HEADER_LEN {
            return Err(PlayoutError::NotParseable("short RTCP header".into()));
        }
        if rest[0] >> 6 != 2 {
            return Err(PlayoutError::NotParseable(format!(
                "RTCP version {}",
                rest[0] >> 6
            )));
        }
        let count = (rest[0] & 0x1f) as usize;
        let pt = rest[1];
        let len = (u16::from_be_bytes([rest[2], rest[3]]) as usize + 1) * 4;
        if len > rest.len() {
            return Err(PlayoutError::NotParseable(format!(
                "RTCP packet of {len} bytes truncated to {}",
                rest.len()
            )));
        }
        let body = &rest[HEADER_LEN..len];

        match pt {
            PT_SR => {
                if body.len() < 24 + count * REPORT_BLOCK_LEN {
                    return Err(PlayoutError::NotParseable("short sender report".into()));
                }
                let client = &mut stats[Peer::Client];
                client.ssrc = be_u32(body, 0);
                client.pkt_count = be_u32(body, 16);
                client.octet_count = be_u32(body, 20);
                client.sr_received = client.sr_received.wrapping_add(1);
                for block in body[24..].chunks_exact(REPORT_BLOCK_LEN).take(count) {
                    client.apply_report_block(block);
                }
            }
            PT_RR => {
                if body.len() < 4 + count * REPORT_BLOCK_LEN {
                    return Err(PlayoutError::NotParseable("short receiver report".into()));
                }
                let client = &mut stats[Peer::Client];
                client.ssrc = be_u32(body, 0);
                client.rr_received = client.rr_received.wrapping_add(1);
                for block in body[4..].chunks_exact(REPORT_BLOCK_LEN).take(count) {
                    client.apply_report_block(block);
                }
            }
            PT_SDES | PT_BYE | PT_APP => {
                tracing::trace!(pt, len, "RTCP packet skipped");
            }
            other => {
                tracing::debug!(pt = other, len, "unknown RTCP packet type");
            }
        }
        offset += len;
        packets += 1;
    }
    Ok(packets)
}

fn put_header(buf: &mut BytesMut, count: u8, pt: u8, body_len: usize) {
    buf.put_u8((2 << 6) | (count & 0x1f));
    buf.put_u8(pt);
    buf.put_u16(((body_len + HEADER_LEN) / 4 - 1) as u16);
}

/// Sender report without report blocks (RFC 3550 §6.4.1).
pub fn build_sender_report(ssrc: u32, ntp: u64, rtp_timestamp: u32, sent: &PeerStats) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 24);
    put_header(&mut buf, 0, PT_SR, 24);
    buf.put_u32(ssrc);
    buf.put_u64(ntp);
    buf.put_u32(rtp_timestamp);
    buf.put_u32(sent.pkt_count);
    buf.put_u32(sent.octet_count);
    buf.freeze()
}

/// SDES packet with a single CNAME item (RFC 3550 §6.5).
pub fn build_sdes(ssrc: u32, cname: &str) -> Bytes {
    let text = &cname.as_bytes()[..cname.len().min(255)];
    // ssrc + CNAME item + END, padded to a word boundary
    let chunk_len = (4 + 2 + text.len() + 1).div_ceil(4) * 4;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + chunk_len);
    put_header(&mut buf, 1, PT_SDES, chunk_len);
    buf.put_u32(ssrc);
    buf.put_u8(SDES_CNAME);
    buf.put_u8(text.len() as u8);
    buf.put_slice(text);
    buf.put_bytes(0, chunk_len - (4 + 2 + text.len()));
    buf.freeze()
}

/// BYE packet for one source (RFC 3550 §6.6).
pub fn build_bye(ssrc: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 4);
    put_header(&mut buf, 1, PT_BYE, 4);
    buf.put_u32(ssrc);
    buf.freeze()
}

/// Concatenate packets into one compound RTCP datagram.
pub fn compound(packets: &[Bytes]) -> Bytes {
    let mut buf = BytesMut::with_capacity(packets.iter().map(Bytes::len).sum());
    for packet in packets {
        buf.put_slice(packet);
    }
    buf.freeze()
}

/// Current wall-clock time as a 64-bit NTP timestamp.
pub fn ntp_now() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs() + NTP_UNIX_OFFSET;
    let frac = ((since_epoch.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (secs << 32) | frac
}
