use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::{
    ElementaryPacket, MediaParser, MediaParserInfo, MediaProperties, MediaType, PacketizedBuffer,
    packetize_unit,
};
use crate::error::{PlayoutError, Result};

pub static INFO: MediaParserInfo = MediaParserInfo {
    encoding_name: "H264",
    media_type: MediaType::Video,
};

/// RTP clock rate for H.264 (RFC 6184 §8.1).
pub const CLOCK_RATE: u32 = 90000;

const FU_A: u8 = 28;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;

/// H.264 payload parser (RFC 6184).
///
/// Takes one Annex B access unit per elementary packet and emits payloads
/// in two packetization modes:
///
/// - **Single NAL Unit** (§5.6): NALs that fit within the MTU become one
///   payload each.
///
/// - **FU-A Fragmentation** (§5.8): NALs exceeding the MTU are split
///   across several payloads, each prefixed by a 2-byte FU header:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]               (up to MTU - 2 bytes)
///   ```
///
/// The marker bit goes on the last payload of the access unit (§5.1).
///
/// SPS/PPS are captured from the first access unit that carries them; from
/// then on the track's `sdp_private` holds `profile-level-id` and
/// `sprop-parameter-sets` (§8.1).
#[derive(Debug)]
pub struct H264Parser {
    mtu: usize,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264Parser {
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            sps: None,
            pps: None,
        }
    }

    /// Constructor registered in the parser table.
    pub fn create(mtu: usize) -> Box<dyn MediaParser> {
        Box::new(Self::new(mtu))
    }

    /// Extract NAL units from an H.264 Annex B bitstream.
    ///
    /// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte
    /// `00 00 01`) and returns the NAL data between them. The start code
    /// length is tracked per NAL so mixed 3- and 4-byte codes split cleanly.
    pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
        let mut i = 0usize;

        // (nal_data_start_index, start_code_length)
        let mut start_entries: Vec<(usize, usize)> = Vec::new();

        while i < data.len() {
            if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
                start_entries.push((i + 4, 4));
                i += 4;
            } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
                start_entries.push((i + 3, 3));
                i += 3;
            } else {
                i += 1;
            }
        }

        let mut nal_units = Vec::with_capacity(start_entries.len());
        for (idx, &(start, _)) in start_entries.iter().enumerate() {
            let end = match start_entries.get(idx + 1) {
                Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
                None => data.len(),
            };
            if start < end {
                nal_units.push(&data[start..end]);
            }
        }
        nal_units
    }

    /// profile-level-id from the SPS (RFC 6184 §8.1): profile_idc,
    /// constraint flags and level_idc.
    fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        if sps.len() < 4 {
            return None;
        }
        Some(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    fn sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    /// Format parameters, in `a=fmtp` order.
    fn fmtp(&self) -> Vec<String> {
        let mut params = vec!["packetization-mode=1".to_string()];
        if let Some(pl) = self.profile_level_id() {
            params.push(format!("profile-level-id={pl}"));
        }
        if let Some(sprop) = self.sprop_parameter_sets() {
            params.push(format!("sprop-parameter-sets={sprop}"));
        }
        params
    }

    /// Remember SPS/PPS the first time they appear. Returns true on change.
    fn capture_parameter_sets(&mut self, data: &[u8]) -> bool {
        if self.sps.is_some() && self.pps.is_some() {
            return false;
        }
        let mut changed = false;
        for nal in Self::extract_nal_units(data) {
            let nal_type = nal[0] & 0x1f;
            if nal_type == NAL_SPS && self.sps.is_none() {
                tracing::debug!(bytes = nal.len(), "H.264 SPS captured from bitstream");
                self.sps = Some(nal.to_vec());
                changed = true;
            } else if nal_type == NAL_PPS && self.pps.is_none() {
                tracing::debug!(bytes = nal.len(), "H.264 PPS captured from bitstream");
                self.pps = Some(nal.to_vec());
                changed = true;
            }
        }
        changed
    }
}

impl MediaParser for H264Parser {
    fn info(&self) -> &'static MediaParserInfo {
        &INFO
    }

    fn init(&mut self, properties: &mut MediaProperties) -> Result<()> {
        if self.mtu <= 2 {
            return Err(PlayoutError::AllocError(format!(
                "MTU {} too small for FU-A",
                self.mtu
            )));
        }
        properties.media_type = MediaType::Video;
        properties.clock_rate = CLOCK_RATE;
        if !properties.extradata.is_empty() {
            let extradata = std::mem::take(&mut properties.extradata);
            self.capture_parameter_sets(&extradata);
            properties.extradata = extradata;
        }
        properties.sdp_private = self.fmtp();
        Ok(())
    }

    fn get_frame<'a>(&mut self, unit: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        Ok(Self::extract_nal_units(unit))
    }

    fn packetize(
        &mut self,
        nal_unit: &[u8],
        last: bool,
        unit: &ElementaryPacket,
        out: &mut Vec<PacketizedBuffer>,
    ) -> Result<()> {
        if nal_unit.is_empty() {
            return Ok(());
        }

        if nal_unit.len() <= self.mtu {
            // Single NAL Unit mode (RFC 6184 §5.6)
            out.push(PacketizedBuffer::from_unit(unit, nal_unit.to_vec(), last));
            return Ok(());
        }

        // FU-A fragmentation (RFC 6184 §5.8)
        let nal_header = nal_unit[0];
        let nal_type = nal_header & 0x1f;
        let fu_indicator = (nal_header & 0x60) | FU_A;
        let payload = &nal_unit[1..];

        let max_fragment = self.mtu - 2;
        let before = out.len();
        let mut offset = 0usize;
        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let last_fragment = remaining <= max_fragment;
            let chunk_size = remaining.min(max_fragment);
            let chunk = &payload[offset..offset + chunk_size];

            // FU header: S=start, E=end, R=0, Type=original NAL type
            let start_bit = if offset == 0 { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };

            let mut fragment = Vec::with_capacity(2 + chunk.len());
            fragment.push(fu_indicator);
            fragment.push(start_bit | end_bit | nal_type);
            fragment.extend_from_slice(chunk);
            out.push(PacketizedBuffer::from_unit(unit, fragment, last && last_fragment));

            offset += chunk_size;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments = out.len() - before,
            "FU-A fragmented NAL unit"
        );
        Ok(())
    }

    fn parse(
        &mut self,
        unit: &ElementaryPacket,
        properties: &mut MediaProperties,
    ) -> Result<Vec<PacketizedBuffer>> {
        if self.capture_parameter_sets(&unit.data) {
            properties.sdp_private = self.fmtp();
        }
        let out = packetize_unit(self, unit)?;
        tracing::trace!(
            payloads = out.len(),
            unit_bytes = unit.data.len(),
            pts = unit.pts,
            "access unit packetized"
        );
        Ok(out)
    }
}
