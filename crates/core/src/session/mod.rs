//! RTP session state (RFC 3550).
//!
//! An [`RtpSession`] is one outgoing media stream towards one client. It is
//! owned by exactly one scheduler slot for its whole life and tracks:
//!
//! - A unique numeric session ID, used in logs.
//! - The started / paused lifecycle flags.
//! - The RTP header state (SSRC, sequence, timestamp base).
//! - RTCP statistics for both ends and the receiver-report count seen by
//!   the last congestion check.
//! - A [`BufferConsumer`] on the track it plays, and a pacing policy.
//!
//! ## Lifecycle
//!
//! ```text
//! new           -> not started, not paused
//! start         -> started                (RR/SR counters reset)
//! pause         -> started, paused
//! resume        -> started
//! stop          -> paused, not started    (final SR + BYE sent)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{PlayoutError, Result};
use crate::media::queue::BufferConsumer;
use crate::media::rtp::RtpHeader;
use crate::rtcp::{self, Peer, RtcpStats};
use crate::scheduler::SlotId;
use crate::transport::Transport;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Largest RTCP datagram read per poll.
const RTCP_RECV_BUF: usize = 1500;

/// When the dispatcher may send the next packet of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Every tick.
    #[default]
    Immediate,
    /// At most once per interval.
    Interval(Duration),
    /// When the next buffer's presentation time has elapsed on the wall
    /// clock since playback started.
    MediaClock,
}

/// One outgoing RTP stream.
pub struct RtpSession {
    id: u64,
    slot: Option<SlotId>,
    started: bool,
    paused: bool,
    previous_count: u32,
    stats: RtcpStats,
    header: RtpHeader,
    transport: Box<dyn Transport>,
    consumer: Option<BufferConsumer>,
    pacing: Pacing,
    last_sent: Option<Instant>,
    clock_anchor: Option<(Instant, f64)>,
    last_report: Option<Instant>,
    last_pts: f64,
    cname: String,
}

impl std::fmt::Debug for RtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpSession")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("started", &self.started)
            .field("paused", &self.paused)
            .field("ssrc", &format_args!("{:#010X}", self.header.ssrc))
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}

impl RtpSession {
    /// Create a session with a random SSRC, sequence and timestamp base.
    pub fn new(transport: Box<dyn Transport>, pt: u8, clock_rate: u32) -> Self {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        let header = RtpHeader::with_random_ssrc(pt, clock_rate);
        let mut stats = RtcpStats::default();
        stats[Peer::Server].ssrc = header.ssrc;
        tracing::debug!(session_id = id, pt, clock_rate, "rtp session created");
        Self {
            id,
            slot: None,
            started: false,
            paused: false,
            previous_count: 0,
            stats,
            header,
            transport,
            consumer: None,
            pacing: Pacing::Immediate,
            last_sent: None,
            clock_anchor: None,
            last_report: None,
            last_pts: 0.0,
            cname: format!("playout-{id}"),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Slot currently owning this session, if any.
    pub fn slot(&self) -> Option<SlotId> {
        self.slot
    }

    pub(crate) fn set_slot(&mut self, slot: Option<SlotId>) {
        self.slot = slot;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Receiver-report count seen by the last congestion check.
    pub fn previous_count(&self) -> u32 {
        self.previous_count
    }

    pub fn set_previous_count(&mut self, count: u32) {
        self.previous_count = count;
    }

    pub fn stats(&self) -> &RtcpStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut RtcpStats {
        &mut self.stats
    }

    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    pub fn cname(&self) -> &str {
        &self.cname
    }

    pub fn set_cname(&mut self, cname: impl Into<String>) {
        self.cname = cname.into();
    }

    /// Attach the track queue this session plays from.
    pub fn attach(&mut self, consumer: BufferConsumer) {
        self.consumer = Some(consumer);
        self.clock_anchor = None;
    }

    pub fn set_pacing(&mut self, pacing: Pacing) {
        self.pacing = pacing;
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Whether the pacing policy allows a send at `now`.
    pub fn is_due(&mut self, now: Instant) -> bool {
        match self.pacing {
            Pacing::Immediate => true,
            Pacing::Interval(interval) => self
                .last_sent
                .is_none_or(|last| now.saturating_duration_since(last) >= interval),
            Pacing::MediaClock => {
                let Some(pts) = self
                    .consumer
                    .as_mut()
                    .and_then(BufferConsumer::current)
                    .map(|buffer| buffer.pts)
                else {
                    // nothing queued; let the action report drained state
                    return true;
                };
                match self.clock_anchor {
                    None => true,
                    Some((at, base)) => {
                        now.saturating_duration_since(at).as_secs_f64() >= pts - base
                    }
                }
            }
        }
    }

    /// Begin (or restart) playback.
    pub fn start(&mut self) {
        self.stats.reset_received();
        self.previous_count = 0;
        self.started = true;
        self.paused = false;
        self.clock_anchor = None;
        // first periodic SR one interval after playback starts
        self.last_report = Some(Instant::now());
        tracing::debug!(session_id = self.id, "rtp session started");
    }

    pub fn pause(&mut self) {
        self.paused = true;
        tracing::debug!(session_id = self.id, "rtp session paused");
    }

    /// Leave the paused state. The media clock restarts at the next buffer.
    pub fn resume(&mut self) {
        self.paused = false;
        self.clock_anchor = None;
        tracing::debug!(session_id = self.id, "rtp session resumed");
    }

    /// Send a final sender report and a BYE, then mark the session paused
    /// and not started.
    pub fn stop(&mut self) -> Result<()> {
        let result = self.send_bye();
        self.paused = true;
        self.started = false;
        tracing::debug!(session_id = self.id, "rtp session stopped");
        result
    }

    /// Default playout action: send the next queued buffer.
    ///
    /// Returns `Ok(())` when nothing is queued yet and
    /// [`EndOfStream`](PlayoutError::EndOfStream) once the track is finished
    /// and this session has sent everything.
    pub fn send_packet(&mut self) -> Result<()> {
        let Some(consumer) = self.consumer.as_mut() else {
            return Ok(());
        };
        let Some(buffer) = consumer.current() else {
            if consumer.is_drained() {
                return Err(PlayoutError::EndOfStream);
            }
            return Ok(());
        };
        consumer.advance();

        let now = Instant::now();
        if self.clock_anchor.is_none() {
            self.clock_anchor = Some((now, buffer.pts));
        }
        let timestamp = self.header.timestamp_for(buffer.pts);
        let header = self.header.write(buffer.marker, timestamp);
        let mut packet = Vec::with_capacity(header.len() + buffer.payload.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(&buffer.payload);

        self.last_sent = Some(now);
        self.last_pts = buffer.pts;
        self.stats.record_sent(buffer.payload.len());
        if let Err(e) = self.transport.send_packet(&packet) {
            tracing::warn!(session_id = self.id, error = %e, "rtp send failed");
            return Err(e);
        }
        tracing::trace!(
            session_id = self.id,
            seq = self.header.sequence().wrapping_sub(1),
            timestamp,
            marker = buffer.marker,
            len = packet.len(),
            "rtp packet sent"
        );
        Ok(())
    }

    fn sender_report(&self) -> bytes::Bytes {
        let server = &self.stats[Peer::Server];
        rtcp::build_sender_report(
            self.header.ssrc,
            rtcp::ntp_now(),
            self.header.timestamp_for(self.last_pts),
            server,
        )
    }

    /// Send SR + SDES(CNAME).
    pub fn send_sender_report(&mut self) -> Result<()> {
        let packet = rtcp::compound(&[
            self.sender_report(),
            rtcp::build_sdes(self.header.ssrc, &self.cname),
        ]);
        self.last_report = Some(Instant::now());
        self.transport.send_report(&packet)?;
        tracing::trace!(session_id = self.id, "rtcp sender report sent");
        Ok(())
    }

    /// Send SR + BYE.
    pub fn send_bye(&mut self) -> Result<()> {
        let packet = rtcp::compound(&[self.sender_report(), rtcp::build_bye(self.header.ssrc)]);
        self.transport.send_report(&packet)?;
        tracing::debug!(session_id = self.id, "rtcp bye sent");
        Ok(())
    }

    /// Whether a periodic sender report is due at `now`.
    pub fn report_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_report
            .is_none_or(|last| now.saturating_duration_since(last) >= interval)
    }

    /// Drain pending RTCP from the client into the session statistics.
    ///
    /// Malformed packets are logged and skipped. Returns the number of
    /// datagrams accepted.
    pub fn receive_reports(&mut self) -> Result<usize> {
        let mut buf = [0u8; RTCP_RECV_BUF];
        let mut accepted = 0;
        while let Some(len) = self.transport.recv_report(&mut buf)? {
            match rtcp::parse_compound(&buf[..len], &mut self.stats) {
                Ok(_) => accepted += 1,
                Err(e) => {
                    tracing::debug!(session_id = self.id, error = %e, "rtcp packet dropped")
                }
            }
        }
        Ok(accepted)
    }
}
