//! Minimal plugins shared by the integration tests.
//!
//! `tagged` container: a 4-byte magic followed by records of
//! `u32 length (big endian) | payload`. One track, codec `RAW`.
//! The `RAW` parser sends each unit as one payload and rejects units
//! larger than the MTU.
//!
//! [`ogg_page`] and [`speex_header`] assemble just enough Ogg/Speex to
//! exercise the built-in demuxer.

#![allow(dead_code)]

use playout::demux::{
    Demuxer, DemuxerDescriptor, DemuxerInfo, InputStream, ResourceContext, TrackInfo,
};
use playout::media::{
    ElementaryPacket, MediaParser, MediaParserInfo, MediaProperties, MediaType, PacketizedBuffer,
    ParserDescriptor,
};
use playout::{PlayoutError, PluginRegistry, Result};

pub const MAGIC: &[u8; 4] = b"TAGD";
pub const FRAME_DURATION: f64 = 0.02;

/// Build a `tagged` container holding `units`.
pub fn tagged(units: &[Vec<u8>]) -> Vec<u8> {
    let mut data = MAGIC.to_vec();
    for unit in units {
        data.extend_from_slice(&(unit.len() as u32).to_be_bytes());
        data.extend_from_slice(unit);
    }
    data
}

pub static TAGGED_INFO: DemuxerInfo = DemuxerInfo {
    name: "Tagged records",
    short_name: "tagged",
    author: "playout",
    comment: "length-prefixed test container",
    extensions: &["tag"],
};

#[derive(Default)]
pub struct TaggedDemuxer {
    index: usize,
}

impl Demuxer for TaggedDemuxer {
    fn info(&self) -> &'static DemuxerInfo {
        &TAGGED_INFO
    }

    fn probe(&self, input: &mut InputStream) -> Result<()> {
        if input.peek(4)? == MAGIC {
            Ok(())
        } else {
            Err(PlayoutError::NotFound(input.name().to_string()))
        }
    }

    fn init(&mut self, resource: &mut ResourceContext) -> Result<()> {
        let mut magic = [0u8; 4];
        resource.input().read_exact(&mut magic)?;
        let properties = MediaProperties {
            encoding_name: RAW_INFO.encoding_name.to_string(),
            payload_type: 97,
            sample_rate: Some(8000),
            ..Default::default()
        };
        resource.add_track(
            TrackInfo {
                name: "raw".into(),
                id: 1,
            },
            properties,
        )?;
        Ok(())
    }

    fn read_packet(&mut self, resource: &mut ResourceContext) -> Result<()> {
        let mut len = [0u8; 4];
        resource.input().read_exact(&mut len)?;
        let mut data = vec![0u8; u32::from_be_bytes(len) as usize];
        resource.input().read_exact(&mut data)?;
        let pts = self.index as f64 * FRAME_DURATION;
        self.index += 1;
        let track = resource
            .track_mut(0)
            .ok_or_else(|| PlayoutError::Damaged("no track".into()))?;
        track.push_packet(ElementaryPacket::new(data, pts, FRAME_DURATION));
        Ok(())
    }

    fn seek(&mut self, _resource: &mut ResourceContext, _time: f64) -> Result<()> {
        Err(PlayoutError::NotSeekable)
    }
}

pub static RAW_INFO: MediaParserInfo = MediaParserInfo {
    encoding_name: "RAW",
    media_type: MediaType::Audio,
};

pub struct RawParser {
    mtu: usize,
}

impl MediaParser for RawParser {
    fn info(&self) -> &'static MediaParserInfo {
        &RAW_INFO
    }

    fn init(&mut self, properties: &mut MediaProperties) -> Result<()> {
        properties.clock_rate = properties.sample_rate.unwrap_or(8000);
        Ok(())
    }

    fn get_frame<'a>(&mut self, unit: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        Ok(vec![unit])
    }

    fn packetize(
        &mut self,
        frame: &[u8],
        last: bool,
        unit: &ElementaryPacket,
        out: &mut Vec<PacketizedBuffer>,
    ) -> Result<()> {
        if frame.len() > self.mtu {
            return Err(PlayoutError::AllocError(format!(
                "{} bytes over MTU {}",
                frame.len(),
                self.mtu
            )));
        }
        out.push(PacketizedBuffer::from_unit(unit, frame.to_vec(), last));
        Ok(())
    }
}

pub fn tagged_descriptor() -> DemuxerDescriptor {
    DemuxerDescriptor {
        info: &TAGGED_INFO,
        create: || Box::new(TaggedDemuxer::default()),
    }
}

pub fn raw_descriptor() -> ParserDescriptor {
    ParserDescriptor {
        info: &RAW_INFO,
        create: |mtu| Box::new(RawParser { mtu }),
    }
}

/// Registry holding only the test plugins.
pub fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry
        .register_demuxer(tagged_descriptor())
        .register_parser(raw_descriptor());
    registry
}

/// Ogg page with a zero CRC; the demuxer does not verify it.
pub fn ogg_page(serial: u32, sequence: u32, flags: u8, granule: i64, packets: &[&[u8]]) -> Vec<u8> {
    let mut lacing = Vec::new();
    for packet in packets {
        lacing.extend(std::iter::repeat_n(255u8, packet.len() / 255));
        lacing.push((packet.len() % 255) as u8);
    }
    let mut page = b"OggS".to_vec();
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

/// 80-byte Speex BOS packet, mono, no extra headers.
pub fn speex_header(rate: u32, frame_size: u32, frames_per_packet: u32) -> Vec<u8> {
    let mut h = vec![0u8; 80];
    h[..8].copy_from_slice(b"Speex   ");
    for (at, value) in [
        (28, 1),
        (32, 80),
        (36, rate),
        (48, 1),
        (52, u32::MAX),
        (56, frame_size),
        (64, frames_per_packet),
    ] {
        h[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }
    h
}
