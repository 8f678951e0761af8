/// RTP fixed header writer (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// One instance lives in every RTP session. Payloads come out of the track
/// queue without headers; the session prefixes them at send time, so the
/// sequence number counts packets actually sent to that peer.
///
/// - **Sequence number**: 16-bit, wrapping, starts at a random offset.
/// - **Timestamp**: `start_rtptime` plus the presentation time in clock
///   ticks (RFC 3550 §5.1).
/// - **SSRC**: random per RFC 3550 §8.1.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    /// Media clock rate in Hz.
    pub clock_rate: u32,
    start_rtptime: u32,
    sequence: u16,
}

impl RtpHeader {
    /// Create with explicit SSRC and zero offsets.
    pub fn new(pt: u8, clock_rate: u32, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            clock_rate,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            clock_rate,
            start_rtptime: 0,
            sequence: 0,
        }
    }

    /// Random SSRC, initial sequence number and timestamp offset.
    ///
    /// RFC 3550 §5.1 recommends random initial values for both counters to
    /// make known-plaintext attacks on encryption harder.
    pub fn with_random_ssrc(pt: u8, clock_rate: u32) -> Self {
        let mut header = Self::new(pt, clock_rate, rand::random::<u32>());
        header.sequence = rand::random::<u16>();
        header.start_rtptime = rand::random::<u32>();
        header
    }

    /// Sequence number the next [`write`](Self::write) will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn start_rtptime(&self) -> u32 {
        self.start_rtptime
    }

    /// RTP timestamp for a presentation time in seconds.
    pub fn timestamp_for(&self, pts: f64) -> u32 {
        let ticks = (pts.max(0.0) * self.clock_rate as f64) as u64;
        self.start_rtptime.wrapping_add(ticks as u32)
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    ///
    /// The `marker` bit (RFC 3550 §5.1) signals the last packet of a frame.
    pub fn write(&mut self, marker: bool, timestamp: u32) -> [u8; 12] {
        let first_byte: u8 = 2 << 6;
        let second_byte: u8 = ((marker as u8) << 7) | (self.pt & 0x7f);

        let mut header = [0u8; 12];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }
}
