//! Ogg container demuxer ([RFC 3533](https://tools.ietf.org/html/rfc3533)).
//!
//! ## Page layout
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | capture_pattern: Magic number for page start "OggS"           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | version       | header_type   | granule_position              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
//! |                                                               |
//! +                               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                               | bitstream_serial_number       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
//! |                               | page_sequence_number          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
//! |                               | CRC_checksum                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
//! |                               | page_segments | segment_table |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Packets are laced across segments: a lacing value of 255 continues the
//! packet into the next segment (and possibly the next page), anything
//! smaller ends it.
//!
//! Each logical bitstream becomes one track, identified by the first packet
//! of its BOS page. Codec header packets become track extradata and are not
//! delivered as media. `init` walks the whole file once to build a page
//! index; files whose pages carry granule positions are seekable.

use std::collections::VecDeque;
use std::ops::Range;

use super::{
    Demuxer, DemuxerDescriptor, DemuxerInfo, FormatFlags, InputStream, ResourceContext, TrackInfo,
};
use crate::error::{PlayoutError, Result};
use crate::media::{ElementaryPacket, MediaProperties, MediaType};

pub static INFO: DemuxerInfo = DemuxerInfo {
    name: "Ogg container",
    short_name: "ogg",
    author: "playout-rs",
    comment: "Xiph.Org Ogg encapsulation, RFC 3533",
    extensions: &["ogg", "oga", "ogv", "spx", "opus"],
};

pub static DESCRIPTOR: DemuxerDescriptor = DemuxerDescriptor {
    info: &INFO,
    create: OggDemuxer::create,
};

pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const PAGE_HEADER_LEN: usize = 27;
/// Header-type flag: page starts with the continuation of a packet.
pub const FLAG_CONTINUED: u8 = 0x01;
/// Header-type flag: first page of a logical bitstream.
pub const FLAG_BOS: u8 = 0x02;
const SPEEX_HEADER_LEN: usize = 80;
/// Speex header limits; anything beyond is treated as a damaged header.
const SPEEX_MAX_FRAME_SIZE: u32 = 1 << 16;
const SPEEX_MAX_FRAMES_PER_PACKET: u32 = 64;
const SPEEX_MAX_EXTRA_HEADERS: u32 = 255;

#[derive(Debug)]
struct Page {
    offset: u64,
    flags: u8,
    granule: i64,
    serial: u32,
    lacing: Vec<u8>,
    body: Vec<u8>,
}

impl Page {
    /// Read the page at the current position.
    ///
    /// A stream that ends before or inside a page reports `EndOfStream`; a
    /// missing capture pattern reports `NotParseable`.
    fn read(input: &mut InputStream) -> Result<Self> {
        let offset = input.position()?;
        let mut header = [0u8; PAGE_HEADER_LEN];
        input.read_exact(&mut header)?;
        if &header[0..4] != CAPTURE_PATTERN {
            return Err(PlayoutError::NotParseable(format!(
                "lost page sync at offset {offset}"
            )));
        }
        if header[4] != 0 {
            return Err(PlayoutError::NotParseable(format!(
                "unsupported page version {} at offset {offset}",
                header[4]
            )));
        }
        let flags = header[5];
        let granule = i64::from_le_bytes(le_array(&header[6..14]));
        let serial = u32::from_le_bytes(le_array(&header[14..18]));

        let mut lacing = vec![0u8; header[26] as usize];
        let mut body = Vec::new();
        let read = input.read_exact(&mut lacing).and_then(|()| {
            body.resize(lacing.iter().map(|&l| l as usize).sum(), 0);
            input.read_exact(&mut body)
        });
        if let Err(e) = read {
            if e.is_end_of_stream() {
                tracing::warn!(offset, "truncated final page");
            }
            return Err(e);
        }

        Ok(Self {
            offset,
            flags,
            granule,
            serial,
            lacing,
            body,
        })
    }

    fn is_bos(&self) -> bool {
        self.flags & FLAG_BOS != 0
    }

    fn is_continued(&self) -> bool {
        self.flags & FLAG_CONTINUED != 0
    }

    /// Packet pieces in this page; `true` when the piece ends its packet.
    fn pieces(&self) -> Vec<(Range<usize>, bool)> {
        let mut pieces = Vec::new();
        let mut start = 0usize;
        let mut end = 0usize;
        for &lace in &self.lacing {
            end += lace as usize;
            if lace < 255 {
                pieces.push((start..end, true));
                start = end;
            }
        }
        if start < end || self.lacing.last() == Some(&255) {
            pieces.push((start..end, false));
        }
        pieces
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(le_array(&bytes[at..at + 4]))
}

/// Speex stream header (the BOS packet of a Speex logical bitstream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeexHeader {
    pub rate: u32,
    pub mode: u32,
    pub channels: u32,
    pub bitrate: i32,
    pub frame_size: u32,
    pub vbr: bool,
    pub frames_per_packet: u32,
    pub extra_headers: u32,
}

impl SpeexHeader {
    pub const MAGIC: &'static [u8; 8] = b"Speex   ";

    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < SPEEX_HEADER_LEN || &packet[..8] != Self::MAGIC {
            return Err(PlayoutError::Damaged("short or unmarked Speex header".into()));
        }
        let header = Self {
            rate: le_u32(packet, 36),
            mode: le_u32(packet, 40),
            channels: le_u32(packet, 48),
            bitrate: le_u32(packet, 52) as i32,
            frame_size: le_u32(packet, 56),
            vbr: le_u32(packet, 60) != 0,
            frames_per_packet: le_u32(packet, 64).max(1),
            extra_headers: le_u32(packet, 68),
        };
        if header.rate == 0
            || header.frame_size == 0
            || header.frame_size > SPEEX_MAX_FRAME_SIZE
        {
            return Err(PlayoutError::Damaged(format!(
                "Speex header with rate {} and frame size {}",
                header.rate, header.frame_size
            )));
        }
        if header.frames_per_packet > SPEEX_MAX_FRAMES_PER_PACKET
            || header.extra_headers > SPEEX_MAX_EXTRA_HEADERS
        {
            return Err(PlayoutError::Damaged(format!(
                "Speex header with {} frames per packet and {} extra headers",
                header.frames_per_packet, header.extra_headers
            )));
        }
        Ok(header)
    }

    /// Seconds of audio in one Ogg packet.
    pub fn packet_duration(&self) -> f64 {
        f64::from(self.frame_size) * f64::from(self.frames_per_packet) / f64::from(self.rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OggCodec {
    Speex(SpeexHeader),
    Vorbis { rate: u32 },
    Theora,
    Opus,
}

impl OggCodec {
    fn identify(packet: &[u8]) -> Result<Self> {
        if packet.starts_with(SpeexHeader::MAGIC) {
            return Ok(Self::Speex(SpeexHeader::parse(packet)?));
        }
        if packet.starts_with(b"\x01vorbis") && packet.len() >= 16 {
            return Ok(Self::Vorbis {
                rate: le_u32(packet, 12),
            });
        }
        if packet.starts_with(b"\x80theora") {
            return Ok(Self::Theora);
        }
        if packet.starts_with(b"OpusHead") {
            return Ok(Self::Opus);
        }
        Err(PlayoutError::Damaged("unknown Ogg codec".into()))
    }

    fn encoding_name(&self) -> &'static str {
        match self {
            Self::Speex(_) => "SPEEX",
            Self::Vorbis { .. } => "VORBIS",
            Self::Theora => "THEORA",
            Self::Opus => "OPUS",
        }
    }

    /// Header packets at the start of the stream, BOS packet included.
    fn header_packets(&self) -> u32 {
        match self {
            Self::Speex(h) => 2u32.saturating_add(h.extra_headers),
            Self::Vorbis { .. } | Self::Theora => 3,
            Self::Opus => 2,
        }
    }

    /// Granule units per second.
    fn rate(&self) -> Option<u32> {
        match self {
            Self::Speex(h) => Some(h.rate),
            Self::Vorbis { rate } => Some(*rate),
            Self::Opus => Some(48000),
            Self::Theora => None,
        }
    }

    fn properties(&self, bos: &[u8]) -> MediaProperties {
        let mut props = MediaProperties {
            encoding_name: self.encoding_name().to_string(),
            media_type: match self {
                Self::Theora => MediaType::Video,
                _ => MediaType::Audio,
            },
            extradata: bos.to_vec(),
            ..Default::default()
        };
        if let Self::Speex(h) = self {
            props.sample_rate = Some(h.rate);
            props.channels = Some(h.channels.min(u8::MAX as u32) as u8);
            props.bit_rate = u32::try_from(h.bitrate).ok();
            props.frame_duration = h.packet_duration();
        }
        props
    }
}

#[derive(Debug)]
struct LogicalStream {
    serial: u32,
    codec: OggCodec,
    track: Option<usize>,
    headers_left: u32,
    partial: Vec<u8>,
    /// Drop the continued piece at the head of the next page.
    discontinuous: bool,
    next_pts: f64,
}

impl LogicalStream {
    fn packet_duration(&self) -> f64 {
        match self.codec {
            OggCodec::Speex(h) => h.packet_duration(),
            _ => 0.0,
        }
    }

    fn granule_time(&self, granule: i64) -> Option<f64> {
        let rate = self.codec.rate()?;
        (granule >= 0).then(|| granule as f64 / rate as f64)
    }

    /// Reassemble the packets completed by `page`.
    fn collect(&mut self, page: &Page) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        for (i, (range, complete)) in page.pieces().into_iter().enumerate() {
            if i == 0 && page.is_continued() && self.discontinuous {
                if !complete {
                    continue;
                }
                self.partial.clear();
                continue;
            }
            if i == 0 && !page.is_continued() && !self.partial.is_empty() {
                tracing::debug!(serial = self.serial, "unterminated packet discarded");
                self.partial.clear();
            }
            self.partial.extend_from_slice(&page.body[range]);
            if complete {
                packets.push(std::mem::take(&mut self.partial));
            }
        }
        self.discontinuous = false;
        packets
    }

    fn restart(&mut self) {
        self.headers_left = self.codec.header_packets();
        self.partial.clear();
        self.discontinuous = false;
        self.next_pts = 0.0;
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    offset: u64,
    stream: usize,
    time: Option<f64>,
}

#[derive(Debug)]
struct ReadyPacket {
    track: usize,
    data: Vec<u8>,
    pts: f64,
    duration: f64,
}

#[derive(Debug, Default)]
pub struct OggDemuxer {
    streams: Vec<LogicalStream>,
    ready: VecDeque<ReadyPacket>,
    index: Vec<IndexEntry>,
}

impl OggDemuxer {
    pub fn create() -> Box<dyn Demuxer> {
        Box::new(Self::default())
    }

    fn stream_index(&self, serial: u32) -> Option<usize> {
        self.streams.iter().position(|s| s.serial == serial)
    }

    fn open_stream(&mut self, ctx: &mut ResourceContext, page: &Page) -> Result<()> {
        let pieces = page.pieces();
        let Some((range, true)) = pieces.first().cloned() else {
            return Err(PlayoutError::Damaged(format!(
                "BOS page of stream {:#x} without a complete packet",
                page.serial
            )));
        };
        let bos = &page.body[range];
        let codec = OggCodec::identify(bos)?;
        let info = TrackInfo {
            name: format!("{}-{:08x}", codec.encoding_name().to_ascii_lowercase(), page.serial),
            id: page.serial,
        };
        let track = match ctx.add_track(info, codec.properties(bos)) {
            Ok(index) => Some(index),
            Err(PlayoutError::UnknownCodec(name)) => {
                tracing::warn!(serial = page.serial, codec = %name, "logical stream skipped");
                None
            }
            Err(e) => return Err(e),
        };
        if let OggCodec::Speex(_) = codec {
            ctx.info_mut().flags.insert(FormatFlags::PKT_LEN);
        }
        let mut stream = LogicalStream {
            serial: page.serial,
            codec,
            track,
            headers_left: codec.header_packets(),
            partial: Vec::new(),
            discontinuous: false,
            next_pts: 0.0,
        };
        // The BOS packet is the first header.
        stream.collect(page);
        stream.headers_left -= 1;
        self.streams.push(stream);
        Ok(())
    }

    /// Stream that drives seeking: the first one with a track and a clock.
    fn primary_stream(&self) -> Option<usize> {
        self.streams
            .iter()
            .position(|s| s.track.is_some() && s.codec.rate().is_some())
    }

    fn resync(input: &mut InputStream, from: u64) -> Result<()> {
        let mut pos = from + 1;
        loop {
            input.seek_to(pos)?;
            let chunk = input.read_up_to(4096)?;
            if let Some(i) = chunk.windows(4).position(|w| w == CAPTURE_PATTERN) {
                return input.seek_to(pos + i as u64);
            }
            if chunk.len() < 4 {
                let end = input.len();
                return input.seek_to(end);
            }
            pos += chunk.len() as u64 - 3;
        }
    }
}

impl Demuxer for OggDemuxer {
    fn info(&self) -> &'static DemuxerInfo {
        &INFO
    }

    fn probe(&self, input: &mut InputStream) -> Result<()> {
        if input.peek(4)? == CAPTURE_PATTERN {
            Ok(())
        } else {
            Err(PlayoutError::NotFound(input.name().to_string()))
        }
    }

    fn init(&mut self, ctx: &mut ResourceContext) -> Result<()> {
        ctx.input().rewind()?;
        loop {
            let page = match Page::read(ctx.input()) {
                Ok(page) => page,
                Err(e) if e.is_end_of_stream() => break,
                Err(e) if self.streams.is_empty() => {
                    return Err(PlayoutError::Damaged(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "page index stopped early");
                    break;
                }
            };

            if page.is_bos() && self.stream_index(page.serial).is_none() {
                self.open_stream(ctx, &page)?;
            }
            let Some(si) = self.stream_index(page.serial) else {
                continue;
            };

            let time = self.streams[si].granule_time(page.granule);
            self.index.push(IndexEntry {
                offset: page.offset,
                stream: si,
                time,
            });

            if page.is_bos() {
                continue;
            }
            let stream = &mut self.streams[si];
            if stream.headers_left == 0 {
                continue;
            }
            for packet in stream.collect(&page) {
                if stream.headers_left == 0 {
                    break;
                }
                stream.headers_left -= 1;
                if let Some(track) = stream.track.and_then(|t| ctx.track_mut(t)) {
                    track.properties_mut().extradata.extend_from_slice(&packet);
                }
            }
        }

        if self.streams.is_empty() {
            return Err(PlayoutError::Damaged("no logical bitstreams".into()));
        }

        let duration = self.primary_stream().and_then(|p| {
            self.index
                .iter()
                .filter(|e| e.stream == p)
                .filter_map(|e| e.time)
                .reduce(f64::max)
        });
        let info = ctx.info_mut();
        info.duration = duration;
        info.seekable = duration.is_some_and(|d| d > 0.0);

        for stream in &mut self.streams {
            stream.restart();
        }
        ctx.input().rewind()?;
        tracing::debug!(
            streams = self.streams.len(),
            pages = self.index.len(),
            duration = ?duration,
            "Ogg page index built"
        );
        Ok(())
    }

    fn read_packet(&mut self, ctx: &mut ResourceContext) -> Result<()> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                if let Some(track) = ctx.track_mut(packet.track) {
                    track.push_packet(ElementaryPacket::new(
                        packet.data,
                        packet.pts,
                        packet.duration,
                    ));
                }
                return Ok(());
            }

            let page = match Page::read(ctx.input()) {
                Ok(page) => page,
                Err(PlayoutError::NotParseable(reason)) => {
                    let from = ctx.input().position()?;
                    Self::resync(ctx.input(), from.saturating_sub(PAGE_HEADER_LEN as u64))?;
                    return Err(PlayoutError::NotParseable(reason));
                }
                Err(e) => return Err(e),
            };
            let Some(si) = self.stream_index(page.serial) else {
                continue;
            };
            let stream = &mut self.streams[si];
            let duration = stream.packet_duration();
            for data in stream.collect(&page) {
                if stream.headers_left > 0 {
                    stream.headers_left -= 1;
                    continue;
                }
                let Some(track) = stream.track else {
                    continue;
                };
                let pts = stream.next_pts;
                stream.next_pts += duration;
                self.ready.push_back(ReadyPacket {
                    track,
                    data,
                    pts,
                    duration,
                });
            }
        }
    }

    fn seek(&mut self, ctx: &mut ResourceContext, time: f64) -> Result<()> {
        let primary = match self.primary_stream() {
            Some(p) if ctx.info().seekable => p,
            _ => return Err(PlayoutError::NotSeekable),
        };
        self.ready.clear();

        let anchor = self.index.iter().rposition(|e| {
            e.stream == primary && e.time.is_some_and(|t| t <= time)
        });
        let Some(anchor) = anchor else {
            // Before the first timed page: replay from the top, headers included.
            for stream in &mut self.streams {
                stream.restart();
            }
            return ctx.input().rewind();
        };
        // Past the last indexed page there is nothing left to play.
        let offset = match self.index.get(anchor + 1) {
            Some(next) => next.offset,
            None => ctx.input().len(),
        };

        for (si, stream) in self.streams.iter_mut().enumerate() {
            stream.headers_left = 0;
            stream.partial.clear();
            stream.discontinuous = true;
            stream.next_pts = self.index[..=anchor]
                .iter()
                .rev()
                .find(|e| e.stream == si && e.time.is_some())
                .and_then(|e| e.time)
                .unwrap_or(0.0);
        }
        tracing::debug!(time, offset, "Ogg seek");
        ctx.input().seek_to(offset)
    }

    fn uninit(&mut self, _ctx: &mut ResourceContext) -> Result<()> {
        self.streams.clear();
        self.ready.clear();
        self.index.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::demux::Resource;
    use crate::registry::PluginRegistry;

    const SERIAL: u32 = 0x1234_5678;

    /// Ogg page with a zero CRC.
    fn build_page(
        serial: u32,
        sequence: u32,
        flags: u8,
        granule: i64,
        packets: &[&[u8]],
    ) -> Vec<u8> {
        let mut lacing = Vec::new();
        for packet in packets {
            let mut len = packet.len();
            while len >= 255 {
                lacing.push(255u8);
                len -= 255;
            }
            lacing.push(len as u8);
        }
        let mut page = Vec::with_capacity(PAGE_HEADER_LEN + lacing.len());
        page.extend_from_slice(CAPTURE_PATTERN);
        page.push(0);
        page.push(flags);
        page.extend_from_slice(&granule.to_le_bytes());
        page.extend_from_slice(&serial.to_le_bytes());
        page.extend_from_slice(&sequence.to_le_bytes());
        page.extend_from_slice(&[0u8; 4]);
        page.push(lacing.len() as u8);
        page.extend_from_slice(&lacing);
        for packet in packets {
            page.extend_from_slice(packet);
        }
        page
    }

    /// Minimal Speex BOS packet.
    fn speex_header_packet(rate: u32, frame_size: u32, frames_per_packet: u32) -> Vec<u8> {
        let mut h = vec![0u8; SPEEX_HEADER_LEN];
        h[..8].copy_from_slice(SpeexHeader::MAGIC);
        h[8..13].copy_from_slice(b"1.2.0");
        let fields: [(usize, u32); 8] = [
            (28, 1),
            (32, SPEEX_HEADER_LEN as u32),
            (36, rate),
            (48, 1),
            (52, u32::MAX),
            (56, frame_size),
            (64, frames_per_packet),
            (68, 0),
        ];
        for (at, value) in fields {
            h[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        h
    }

    /// Speex file: BOS, comment header, then `data` packets one per page
    /// with granules advancing one packet (160 samples at 8 kHz) each.
    fn speex_file(data: &[Vec<u8>]) -> Vec<u8> {
        let mut file = build_page(SERIAL, 0, FLAG_BOS, 0, &[&speex_header_packet(8000, 160, 1)]);
        file.extend(build_page(SERIAL, 1, 0, 0, &[b"comment"]));
        for (i, packet) in data.iter().enumerate() {
            let granule = (i as i64 + 1) * 160;
            file.extend(build_page(SERIAL, i as u32 + 2, 0, granule, &[packet]));
        }
        file
    }

    fn open(bytes: Vec<u8>) -> Resource {
        let registry = Arc::new(PluginRegistry::with_defaults());
        Resource::open(InputStream::from_bytes("clip.spx", bytes), &registry, 1440).unwrap()
    }

    #[test]
    fn lacing_splits_and_continues() {
        let big = vec![1u8; 300];
        let small = vec![2u8; 10];
        let raw = build_page(1, 0, 0, 0, &[&big, &small]);
        let page = Page::read(&mut InputStream::from_bytes("p", raw)).unwrap();
        let pieces = page.pieces();
        assert_eq!(pieces, vec![(0..300, true), (300..310, true)]);

        let mut open_page = page;
        open_page.lacing = vec![255];
        open_page.body.truncate(255);
        assert_eq!(open_page.pieces(), vec![(0..255, false)]);
    }

    #[test]
    fn speex_header_fields() {
        let h = SpeexHeader::parse(&speex_header_packet(16000, 320, 2)).unwrap();
        assert_eq!(h.rate, 16000);
        assert_eq!(h.frame_size, 320);
        assert_eq!(h.frames_per_packet, 2);
        assert!((h.packet_duration() - 0.04).abs() < 1e-9);
        assert!(SpeexHeader::parse(b"Speex   short").is_err());
    }

    #[test]
    fn speex_track_and_packets() {
        let packets = vec![vec![0xA1; 38], vec![0xA2; 38], vec![0xA3; 38]];
        let mut res = open(speex_file(&packets));
        assert_eq!(res.info().demuxer, "ogg");
        assert!(res.info().flags.contains(FormatFlags::PKT_LEN));
        assert_eq!(res.tracks().len(), 1);
        let track = res.track(0).unwrap();
        assert_eq!(track.properties().encoding_name, "SPEEX");
        assert_eq!(track.properties().clock_rate, 8000);
        assert_eq!(track.info().id, SERIAL);
        // BOS header plus comment.
        assert_eq!(track.properties().extradata.len(), SPEEX_HEADER_LEN + 7);

        let mut pts = Vec::new();
        loop {
            match res.read_packet() {
                Ok(()) => {}
                Err(e) if e.is_end_of_stream() => break,
                Err(e) => panic!("unexpected {e}"),
            }
            let track = res.track_mut(0).unwrap();
            pts.push(track.properties().pts);
            assert_eq!(track.parse_next().unwrap(), Some(1));
        }
        assert_eq!(pts, vec![0.0, 0.02, 0.04]);
        assert!(res.track(0).unwrap().producer().is_finished());
    }

    #[test]
    fn packet_spanning_pages_is_reassembled() {
        let mut file = build_page(SERIAL, 0, FLAG_BOS, 0, &[&speex_header_packet(8000, 160, 1)]);
        file.extend(build_page(SERIAL, 1, 0, 0, &[b"comment"]));
        // 300-byte packet: 255 on the first page, 45 on the continued one.
        let mut first = build_page(SERIAL, 2, 0, -1, &[&[7u8; 255]]);
        // Force an open packet: lacing [255] with no terminator.
        first[26] = 1;
        first.truncate(PAGE_HEADER_LEN + 1 + 255);
        file.extend(first);
        file.extend(build_page(SERIAL, 3, FLAG_CONTINUED, 160, &[&[7u8; 45]]));

        let mut res = open(file);
        res.read_packet().unwrap();
        let track = res.track(0).unwrap();
        assert_eq!(track.pending(), 1);
        assert!(res.read_packet().unwrap_err().is_end_of_stream());
    }

    #[test]
    fn seek_uses_page_index() {
        let packets: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 20]).collect();
        let mut res = open(speex_file(&packets));
        assert!(res.info().seekable);
        assert!((res.info().duration.unwrap() - 0.2).abs() < 1e-9);

        res.seek(0.1).unwrap();
        res.read_packet().unwrap();
        let track = res.track(0).unwrap();
        assert!((track.properties().pts - 0.1).abs() < 1e-9);
        let mut consumer = track.subscribe();
        res.track_mut(0).unwrap().parse_next().unwrap();
        assert_eq!(consumer.current().unwrap().payload[0], 5);
    }

    #[test]
    fn seek_at_or_past_duration_ends_stream() {
        let packets: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 20]).collect();
        let mut res = open(speex_file(&packets));
        res.seek(0.2).unwrap();
        assert!(res.read_packet().unwrap_err().is_end_of_stream());

        res.seek(5.0).unwrap();
        assert!(res.read_packet().unwrap_err().is_end_of_stream());
        assert_eq!(res.track(0).unwrap().pending(), 0);

        // still seekable back into the file
        res.seek(0.1).unwrap();
        res.read_packet().unwrap();
        assert!((res.track(0).unwrap().properties().pts - 0.1).abs() < 1e-9);
    }

    fn open_err(header: Vec<u8>) -> PlayoutError {
        let mut file = build_page(SERIAL, 0, FLAG_BOS, 0, &[&header]);
        file.extend(build_page(SERIAL, 1, 0, 0, &[b"comment"]));
        file.extend(build_page(SERIAL, 2, 0, 160, &[&[1u8; 10]]));
        let registry = Arc::new(PluginRegistry::with_defaults());
        Resource::open(InputStream::from_bytes("bad.spx", file), &registry, 1440).unwrap_err()
    }

    #[test]
    fn oversized_speex_frames_are_damaged() {
        let err = open_err(speex_header_packet(8000, 0x10000, 0x10000));
        assert_eq!(err.status().as_str(), "damaged");
        let err = open_err(speex_header_packet(8000, 0x10001, 1));
        assert_eq!(err.status().as_str(), "damaged");

        let h = SpeexHeader::parse(&speex_header_packet(8000, 0x10000, 64)).unwrap();
        assert!((h.packet_duration() - 524.288).abs() < 1e-9);
    }

    #[test]
    fn huge_extra_header_count_is_damaged() {
        let mut header = speex_header_packet(8000, 160, 1);
        header[68..72].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(open_err(header).status().as_str(), "damaged");

        let mut header = speex_header_packet(8000, 160, 1);
        header[68..72].copy_from_slice(&255u32.to_le_bytes());
        let codec = OggCodec::identify(&header).unwrap();
        assert_eq!(codec.header_packets(), 257);
    }

    #[test]
    fn seek_before_first_page_replays_headers() {
        let packets: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i; 20]).collect();
        let mut res = open(speex_file(&packets));
        res.read_packet().unwrap();
        res.read_packet().unwrap();
        res.seek(0.0).unwrap();
        res.read_packet().unwrap();
        assert_eq!(res.track(0).unwrap().properties().pts, 0.0);
    }

    #[test]
    fn no_granules_means_not_seekable() {
        let mut file = build_page(SERIAL, 0, FLAG_BOS, 0, &[&speex_header_packet(8000, 160, 1)]);
        file.extend(build_page(SERIAL, 1, 0, 0, &[b"comment"]));
        file.extend(build_page(SERIAL, 2, 0, -1, &[&[1u8; 10]]));
        let mut res = open(file);
        assert!(!res.info().seekable);
        assert_eq!(res.seek(1.0).unwrap_err().status().as_str(), "not_seekable");
    }

    #[test]
    fn unsupported_codec_only_is_damaged() {
        let vorbis = [&b"\x01vorbis"[..], &[0u8; 5], &44100u32.to_le_bytes(), &[0u8; 14]].concat();
        let file = build_page(9, 0, FLAG_BOS, 0, &[&vorbis]);
        let registry = Arc::new(PluginRegistry::with_defaults());
        let err = Resource::open(InputStream::from_bytes("a.ogg", file), &registry, 1440)
            .unwrap_err();
        assert_eq!(err.status().as_str(), "damaged");
    }

    #[test]
    fn garbage_between_pages_resyncs() {
        let packets = vec![vec![1u8; 10], vec![2u8; 10]];
        let mut file = speex_file(&packets[..1]);
        file.extend_from_slice(b"garbage!");
        file.extend(build_page(SERIAL, 3, 0, 320, &[&packets[1]]));
        let mut res = open(file);
        res.read_packet().unwrap();
        assert_eq!(res.read_packet().unwrap_err().status().as_str(), "not_parseable");
        res.read_packet().unwrap();
        assert_eq!(res.track(0).unwrap().pending(), 2);
    }
}
