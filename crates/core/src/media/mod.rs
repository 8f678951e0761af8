//! Media parsers: elementary-stream units in, protocol-ready payloads out.
//!
//! A demuxer hands each track a sequence of [`ElementaryPacket`]s. The
//! track's [`MediaParser`] turns every unit into zero or more
//! [`PacketizedBuffer`]s that fit the configured MTU; those land in the
//! track's [`queue::BufferProducer`] where RTP sessions pick them up.
//!
//! ## Supported codecs
//!
//! | Encoding | Module | RFC | Fragments above MTU |
//! |----------|--------|-----|---------------------|
//! | H264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | yes (FU-A) |
//! | MPEG4-GENERIC | [`aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) | yes |
//! | SPEEX | [`speex`] | [RFC 5574](https://tools.ietf.org/html/rfc5574) | no |
//!
//! Fragmentation is a property of the codec variant. The general contract is
//! that a unit which cannot be expressed within the MTU is rejected with
//! [`PlayoutError::AllocError`] and dropped; the parser keeps its state and
//! the next unit is processed normally.

pub mod aac;
pub mod h264;
pub mod queue;
pub mod rtp;
pub mod speex;

use bytes::Bytes;

use crate::error::{PlayoutError, Result};

/// Default maximum payload size per packet.
pub const DEFAULT_MTU: usize = 1440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    Undefined,
    Audio,
    Video,
    Application,
    Data,
    Control,
}

/// Whether a track is read from storage or fed live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaSource {
    #[default]
    Stored,
    Live,
}

/// Codec properties of a track.
///
/// Timing fields are in seconds. `pts`/`dts` follow the last unit handed to
/// the track; `frame_duration` is the nominal duration of one unit.
#[derive(Debug, Clone, Default)]
pub struct MediaProperties {
    pub encoding_name: String,
    pub media_type: MediaType,
    pub media_source: MediaSource,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub bit_rate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub frame_rate: Option<f64>,
    pub pts: f64,
    pub dts: f64,
    pub frame_duration: f64,
    /// Codec configuration carried out of band (e.g. header packets).
    pub extradata: Vec<u8>,
    /// Format parameters for the session-description layer (`a=fmtp`).
    pub sdp_private: Vec<String>,
}

/// One demuxed unit of a single track.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementaryPacket {
    pub data: Bytes,
    pub pts: f64,
    pub dts: f64,
    pub duration: f64,
}

impl ElementaryPacket {
    pub fn new(data: impl Into<Bytes>, pts: f64, duration: f64) -> Self {
        Self {
            data: data.into(),
            pts,
            dts: pts,
            duration,
        }
    }
}

/// A payload ready to be prefixed with an RTP header and sent.
///
/// `marker` is set on the last packet of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketizedBuffer {
    pub payload: Bytes,
    pub pts: f64,
    pub dts: f64,
    pub duration: f64,
    pub marker: bool,
}

impl PacketizedBuffer {
    /// Build a buffer that inherits the timing of `unit`.
    pub fn from_unit(unit: &ElementaryPacket, payload: impl Into<Bytes>, marker: bool) -> Self {
        Self {
            payload: payload.into(),
            pts: unit.pts,
            dts: unit.dts,
            duration: unit.duration,
            marker,
        }
    }
}

/// Static metadata of a parser variant.
#[derive(Debug)]
pub struct MediaParserInfo {
    /// Encoding name as it appears in `a=rtpmap` (matched case-insensitively).
    pub encoding_name: &'static str,
    pub media_type: MediaType,
}

/// Per-track codec parser.
///
/// Implementations provide [`get_frame`](Self::get_frame) (split a unit into
/// codec frames) and [`packetize`](Self::packetize) (turn one frame into
/// payloads). The provided [`parse`](Self::parse) chains the two and only
/// commits output when the whole unit succeeded.
pub trait MediaParser: Send {
    fn info(&self) -> &'static MediaParserInfo;

    /// Prepare codec state and fill in codec-derived track properties.
    fn init(&mut self, properties: &mut MediaProperties) -> Result<()>;

    /// Split one elementary unit into codec frames.
    fn get_frame<'a>(&mut self, unit: &'a [u8]) -> Result<Vec<&'a [u8]>>;

    /// Append the payloads for one frame to `out`.
    ///
    /// `last` is true for the final frame of the unit; the final payload
    /// produced for it carries the marker bit.
    fn packetize(
        &mut self,
        frame: &[u8],
        last: bool,
        unit: &ElementaryPacket,
        out: &mut Vec<PacketizedBuffer>,
    ) -> Result<()>;

    /// Consume one elementary unit and return its packetized buffers.
    fn parse(
        &mut self,
        unit: &ElementaryPacket,
        _properties: &mut MediaProperties,
    ) -> Result<Vec<PacketizedBuffer>> {
        packetize_unit(self, unit)
    }

    /// Release parser state. Parsers with nothing to release keep the default.
    fn uninit(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Run `get_frame` then `packetize` over every frame of `unit`.
pub fn packetize_unit<P: MediaParser + ?Sized>(
    parser: &mut P,
    unit: &ElementaryPacket,
) -> Result<Vec<PacketizedBuffer>> {
    let data = unit.data.clone();
    let frames = parser.get_frame(&data)?;
    let mut out = Vec::new();
    let count = frames.len();
    for (i, frame) in frames.into_iter().enumerate() {
        parser.packetize(frame, i + 1 == count, unit, &mut out)?;
    }
    Ok(out)
}

/// Reject a payload that does not fit in `mtu` bytes.
pub(crate) fn check_mtu(encoding: &str, len: usize, mtu: usize) -> Result<()> {
    if len > mtu {
        return Err(PlayoutError::AllocError(format!(
            "{encoding} unit of {len} bytes exceeds MTU {mtu}"
        )));
    }
    Ok(())
}

/// Process-wide descriptor of a parser variant.
///
/// Registered once in a [`PluginRegistry`](crate::registry::PluginRegistry);
/// `create` builds the per-track instance for a given MTU.
#[derive(Debug, Clone, Copy)]
pub struct ParserDescriptor {
    pub info: &'static MediaParserInfo,
    pub create: fn(mtu: usize) -> Box<dyn MediaParser>,
}

impl ParserDescriptor {
    pub fn encoding_name(&self) -> &'static str {
        self.info.encoding_name
    }
}
