//! Raw elementary streams: H.264 Annex B (`.264`, `.h264`) and AAC ADTS
//! (`.aac`).
//!
//! The whole file is loaded on `init` and cut into units up front; packets
//! are then zero-copy slices of that buffer. There is no index to seek on.

use std::ops::Range;

use bytes::Bytes;

use super::{
    Demuxer, DemuxerDescriptor, DemuxerInfo, FormatFlags, InputStream, ResourceContext, TrackInfo,
};
use crate::bitstream::BitReader;
use crate::error::{PlayoutError, Result};
use crate::media::aac::{AdtsHeader, SAMPLES_PER_FRAME};
use crate::media::{ElementaryPacket, MediaProperties, MediaType};

pub static INFO: DemuxerInfo = DemuxerInfo {
    name: "Raw elementary stream",
    short_name: "es",
    author: "playout-rs",
    comment: "H.264 Annex B access units and AAC ADTS frames",
    extensions: &["264", "h264", "aac"],
};

pub static DESCRIPTOR: DemuxerDescriptor = DemuxerDescriptor {
    info: &INFO,
    create: EsDemuxer::create,
};

/// Frame rate assumed for raw H.264, which carries no container timing.
pub const DEFAULT_FRAME_RATE: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    H264,
    Adts,
}

impl Kind {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "264" | "h264" => Some(Self::H264),
            "aac" => Some(Self::Adts),
            _ => None,
        }
    }

    fn matches(&self, head: &[u8]) -> bool {
        match self {
            Self::H264 => head.starts_with(&[0, 0, 0, 1]) || head.starts_with(&[0, 0, 1]),
            Self::Adts => head.len() >= 2 && head[0] == 0xFF && head[1] & 0xF6 == 0xF0,
        }
    }
}

#[derive(Debug)]
pub struct EsDemuxer {
    kind: Option<Kind>,
    data: Bytes,
    units: Vec<Range<usize>>,
    next: usize,
    duration: f64,
}

impl EsDemuxer {
    pub fn create() -> Box<dyn Demuxer> {
        Box::new(Self {
            kind: None,
            data: Bytes::new(),
            units: Vec::new(),
            next: 0,
            duration: 0.0,
        })
    }

    fn init_h264(&mut self, ctx: &mut ResourceContext) -> Result<()> {
        self.units = split_access_units(&self.data);
        if self.units.is_empty() {
            return Err(PlayoutError::Damaged("no H.264 access units".into()));
        }
        self.duration = 1.0 / DEFAULT_FRAME_RATE;
        let props = MediaProperties {
            encoding_name: "H264".into(),
            media_type: MediaType::Video,
            payload_type: 96,
            frame_rate: Some(DEFAULT_FRAME_RATE),
            frame_duration: self.duration,
            ..Default::default()
        };
        ctx.add_track(
            TrackInfo {
                name: "video".into(),
                id: 0,
            },
            props,
        )?;
        ctx.info_mut().flags.insert(FormatFlags::FRAME_RATE);
        Ok(())
    }

    fn init_adts(&mut self, ctx: &mut ResourceContext) -> Result<()> {
        let first = AdtsHeader::parse(&self.data)
            .map_err(|e| PlayoutError::Damaged(format!("first ADTS frame: {e}")))?;
        let mut offset = 0usize;
        while offset < self.data.len() {
            match AdtsHeader::parse(&self.data[offset..]) {
                Ok(h) if offset + h.frame_length <= self.data.len() => {
                    self.units.push(offset..offset + h.frame_length);
                    offset += h.frame_length;
                }
                Ok(_) => {
                    tracing::warn!(offset, "truncated trailing ADTS frame ignored");
                    break;
                }
                Err(e) => {
                    tracing::warn!(offset, error = %e, "ADTS frame sequence stopped");
                    break;
                }
            }
        }

        let sample_rate = first.sample_rate().unwrap_or(44100);
        self.duration = SAMPLES_PER_FRAME as f64 / sample_rate as f64;
        let props = MediaProperties {
            encoding_name: "MPEG4-GENERIC".into(),
            media_type: MediaType::Audio,
            payload_type: 97,
            sample_rate: Some(sample_rate),
            channels: Some(first.channel_configuration),
            frame_duration: self.duration,
            extradata: first.audio_specific_config().to_vec(),
            ..Default::default()
        };
        ctx.add_track(
            TrackInfo {
                name: "audio".into(),
                id: 0,
            },
            props,
        )?;
        ctx.info_mut().flags.insert(FormatFlags::PKT_LEN);
        Ok(())
    }
}

impl Demuxer for EsDemuxer {
    fn info(&self) -> &'static DemuxerInfo {
        &INFO
    }

    fn probe(&self, input: &mut InputStream) -> Result<()> {
        let kind = input
            .extension()
            .as_deref()
            .and_then(Kind::from_extension)
            .ok_or_else(|| PlayoutError::NotFound(input.name().to_string()))?;
        if kind.matches(&input.peek(4)?) {
            Ok(())
        } else {
            Err(PlayoutError::NotFound(input.name().to_string()))
        }
    }

    fn init(&mut self, ctx: &mut ResourceContext) -> Result<()> {
        let kind = ctx
            .input()
            .extension()
            .as_deref()
            .and_then(Kind::from_extension)
            .ok_or_else(|| PlayoutError::Damaged("unknown elementary stream type".into()))?;
        ctx.input().rewind()?;
        self.data = Bytes::from(ctx.input().read_to_end()?);
        self.kind = Some(kind);
        match kind {
            Kind::H264 => self.init_h264(ctx)?,
            Kind::Adts => self.init_adts(ctx)?,
        }
        ctx.info_mut().duration = Some(self.units.len() as f64 * self.duration);
        tracing::debug!(kind = ?kind, units = self.units.len(), "elementary stream indexed");
        Ok(())
    }

    fn read_packet(&mut self, ctx: &mut ResourceContext) -> Result<()> {
        let Some(range) = self.units.get(self.next).cloned() else {
            return Err(PlayoutError::EndOfStream);
        };
        let pts = self.next as f64 * self.duration;
        self.next += 1;
        let track = ctx
            .track_mut(0)
            .ok_or_else(|| PlayoutError::NotParseable("no track".into()))?;
        track.push_packet(ElementaryPacket::new(self.data.slice(range), pts, self.duration));
        Ok(())
    }

    fn seek(&mut self, _ctx: &mut ResourceContext, _time: f64) -> Result<()> {
        Err(PlayoutError::NotSeekable)
    }

    fn uninit(&mut self, _ctx: &mut ResourceContext) -> Result<()> {
        self.data = Bytes::new();
        self.units.clear();
        Ok(())
    }
}

/// Split an Annex B stream into access units (H.264 §7.4.1.2.3).
///
/// A new unit starts at an AUD, SPS, PPS or SEI that follows a coded slice,
/// or at a slice whose `first_mb_in_slice` is zero following another slice.
/// Ranges include the leading start code.
pub fn split_access_units(data: &[u8]) -> Vec<Range<usize>> {
    let mut units = Vec::new();
    let mut unit_start: Option<usize> = None;
    let mut seen_slice = false;

    for (sc_start, nal_start) in start_codes(data) {
        let Some(&header) = data.get(nal_start) else {
            continue;
        };
        let nal_type = header & 0x1f;
        let is_slice = matches!(nal_type, 1 | 5);
        let boundary = seen_slice
            && match nal_type {
                6..=9 => true,
                1 | 5 => first_mb_in_slice(&data[nal_start + 1..]) == Some(0),
                _ => false,
            };

        match unit_start {
            None => unit_start = Some(sc_start),
            Some(start) if boundary => {
                units.push(start..sc_start);
                unit_start = Some(sc_start);
                seen_slice = false;
            }
            Some(_) => {}
        }
        seen_slice |= is_slice;
    }
    if let Some(start) = unit_start {
        units.push(start..data.len());
    }
    units
}

fn first_mb_in_slice(slice_header: &[u8]) -> Option<u32> {
    BitReader::new(slice_header).read_ue().ok()
}

/// (start code offset, NAL header offset) pairs.
fn start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut i = 0usize;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let sc_start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            found.push((sc_start, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }
    found
}
