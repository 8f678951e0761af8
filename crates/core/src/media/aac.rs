use super::{
    ElementaryPacket, MediaParser, MediaParserInfo, MediaProperties, MediaType, PacketizedBuffer,
};
use crate::bitstream::BitReader;
use crate::error::{PlayoutError, Result};

pub static INFO: MediaParserInfo = MediaParserInfo {
    encoding_name: "MPEG4-GENERIC",
    media_type: MediaType::Audio,
};

/// Sampling rates indexed by `sampling_frequency_index` (ISO 14496-3 §1.6.3.4).
pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// PCM samples carried by one AAC frame.
pub const SAMPLES_PER_FRAME: u32 = 1024;

/// AU-headers-length field plus one 16-bit AU header.
const AU_HEADER_SECTION: usize = 4;
/// Largest AU size the 13-bit sizeLength field can express.
const MAX_AU_SIZE: usize = (1 << 13) - 1;

/// Fixed and variable ADTS header fields (ISO 13818-7 §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    pub protection_absent: bool,
    /// Audio object type minus one.
    pub profile: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
    /// Length of header plus payload in bytes.
    pub frame_length: usize,
    pub raw_data_blocks: u8,
}

impl AdtsHeader {
    /// Parse the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = BitReader::new(data);
        if r.read(12)? != 0xFFF {
            return Err(PlayoutError::NotParseable("missing ADTS syncword".into()));
        }
        r.skip(3)?; // id, layer
        let protection_absent = r.read_flag()?;
        let profile = r.read(2)? as u8;
        let sampling_frequency_index = r.read(4)? as u8;
        r.skip(1)?; // private_bit
        let channel_configuration = r.read(3)? as u8;
        r.skip(4)?; // original_copy, home, copyright id bit/start
        let frame_length = r.read(13)? as usize;
        r.skip(11)?; // adts_buffer_fullness
        let raw_data_blocks = r.read(2)? as u8;

        let header = Self {
            protection_absent,
            profile,
            sampling_frequency_index,
            channel_configuration,
            frame_length,
            raw_data_blocks,
        };
        if header.sample_rate().is_none() {
            return Err(PlayoutError::Damaged(format!(
                "ADTS sampling frequency index {sampling_frequency_index}"
            )));
        }
        if frame_length < header.header_len() {
            return Err(PlayoutError::Damaged(format!(
                "ADTS frame length {frame_length} shorter than header"
            )));
        }
        Ok(header)
    }

    pub fn header_len(&self) -> usize {
        if self.protection_absent { 7 } else { 9 }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES.get(self.sampling_frequency_index as usize).copied()
    }

    /// Two-byte AudioSpecificConfig for `a=fmtp config=` (ISO 14496-3 §1.6.2.1).
    pub fn audio_specific_config(&self) -> [u8; 2] {
        let object_type = (self.profile + 1) as u16;
        let config = (object_type << 11)
            | ((self.sampling_frequency_index as u16) << 7)
            | ((self.channel_configuration as u16) << 3);
        config.to_be_bytes()
    }
}

/// AAC payload parser, RFC 3640 `mode=AAC-hbr`.
///
/// Each payload starts with a 16-bit AU-headers-length (always 16) and one
/// AU header: 13-bit AU size, 3-bit index. ADTS headers on incoming units
/// are stripped. An AU that does not fit is split across payloads that all
/// repeat the header with the full AU size (§3.2.3.1); the marker bit goes
/// on the last fragment.
#[derive(Debug)]
pub struct AacParser {
    mtu: usize,
    config: Option<[u8; 2]>,
}

impl AacParser {
    pub fn new(mtu: usize) -> Self {
        Self { mtu, config: None }
    }

    pub fn create(mtu: usize) -> Box<dyn MediaParser> {
        Box::new(Self::new(mtu))
    }

    fn fmtp(&self) -> Vec<String> {
        let mut params = vec![
            "streamtype=5".to_string(),
            "profile-level-id=15".to_string(),
            "mode=AAC-hbr".to_string(),
        ];
        if let Some(config) = self.config {
            params.push(format!("config={:02x}{:02x}", config[0], config[1]));
        }
        params.extend([
            "sizeLength=13".to_string(),
            "indexLength=3".to_string(),
            "indexDeltaLength=3".to_string(),
        ]);
        params
    }

    fn au_header(au_size: usize) -> [u8; AU_HEADER_SECTION] {
        let size = ((au_size as u16) << 3).to_be_bytes();
        [0x00, 0x10, size[0], size[1]]
    }
}

impl MediaParser for AacParser {
    fn info(&self) -> &'static MediaParserInfo {
        &INFO
    }

    fn init(&mut self, properties: &mut MediaProperties) -> Result<()> {
        if self.mtu <= AU_HEADER_SECTION {
            return Err(PlayoutError::AllocError(format!(
                "MTU {} too small for AU header",
                self.mtu
            )));
        }
        properties.media_type = MediaType::Audio;
        if properties.extradata.len() >= 2 {
            self.config = Some([properties.extradata[0], properties.extradata[1]]);
        }
        let sample_rate = properties.sample_rate.unwrap_or(44100);
        properties.clock_rate = sample_rate;
        properties.frame_duration = SAMPLES_PER_FRAME as f64 / sample_rate as f64;
        properties.sdp_private = self.fmtp();
        Ok(())
    }

    /// One AU per ADTS frame; units without a syncword are a single raw AU.
    fn get_frame<'a>(&mut self, unit: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        if unit.len() < 2 || unit[0] != 0xFF || unit[1] & 0xF0 != 0xF0 {
            return Ok(vec![unit]);
        }
        let mut frames = Vec::new();
        let mut rest = unit;
        while !rest.is_empty() {
            let header = AdtsHeader::parse(rest)?;
            if header.frame_length > rest.len() {
                return Err(PlayoutError::Damaged(format!(
                    "ADTS frame of {} bytes truncated to {}",
                    header.frame_length,
                    rest.len()
                )));
            }
            frames.push(&rest[header.header_len()..header.frame_length]);
            rest = &rest[header.frame_length..];
        }
        Ok(frames)
    }

    fn packetize(
        &mut self,
        au: &[u8],
        last: bool,
        unit: &ElementaryPacket,
        out: &mut Vec<PacketizedBuffer>,
    ) -> Result<()> {
        if au.len() > MAX_AU_SIZE {
            return Err(PlayoutError::AllocError(format!(
                "AAC access unit of {} bytes exceeds AU size field",
                au.len()
            )));
        }
        let header = Self::au_header(au.len());
        let max_fragment = self.mtu - AU_HEADER_SECTION;
        let mut chunks = au.chunks(max_fragment).peekable();
        while let Some(chunk) = chunks.next() {
            let mut payload = Vec::with_capacity(AU_HEADER_SECTION + chunk.len());
            payload.extend_from_slice(&header);
            payload.extend_from_slice(chunk);
            let marker = last && chunks.peek().is_none();
            out.push(PacketizedBuffer::from_unit(unit, payload, marker));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ADTS header for AAC-LC, 44.1 kHz, stereo, no CRC.
    fn adts_frame(payload_len: usize) -> Vec<u8> {
        let frame_length = payload_len + 7;
        let mut frame = vec![
            0xFF,
            0xF1,
            (1 << 6) | (4 << 2),
            (2 << 6) | ((frame_length >> 11) & 0x03) as u8,
            ((frame_length >> 3) & 0xFF) as u8,
            (((frame_length & 0x07) << 5) as u8) | 0x1F,
            0xFC,
        ];
        frame.extend(std::iter::repeat_n(0x21, payload_len));
        frame
    }

    #[test]
    fn parses_adts_header() {
        let frame = adts_frame(100);
        let h = AdtsHeader::parse(&frame).unwrap();
        assert!(h.protection_absent);
        assert_eq!(h.profile, 1);
        assert_eq!(h.sample_rate(), Some(44100));
        assert_eq!(h.channel_configuration, 2);
        assert_eq!(h.frame_length, 107);
        assert_eq!(h.audio_specific_config(), [0x12, 0x10]);
    }

    #[test]
    fn rejects_missing_syncword() {
        assert!(AdtsHeader::parse(&[0x00; 7]).is_err());
    }

    #[test]
    fn single_au_payload_layout() {
        let mut p = AacParser::new(1440);
        let unit = ElementaryPacket::new(adts_frame(100), 0.0, 0.023);
        let out = p.parse(&unit, &mut MediaProperties::default()).unwrap();
        assert_eq!(out.len(), 1);
        let payload = &out[0].payload;
        assert_eq!(payload.len(), 4 + 100);
        assert_eq!(&payload[..2], &[0x00, 0x10]);
        assert_eq!(u16::from_be_bytes([payload[2], payload[3]]) >> 3, 100);
        assert!(out[0].marker);
    }

    #[test]
    fn large_au_is_fragmented() {
        let mut p = AacParser::new(104);
        let unit = ElementaryPacket::new(adts_frame(250), 0.0, 0.023);
        let out = p.parse(&unit, &mut MediaProperties::default()).unwrap();
        assert_eq!(out.len(), 3);
        for buf in &out {
            assert!(buf.payload.len() <= 104);
            assert_eq!(u16::from_be_bytes([buf.payload[2], buf.payload[3]]) >> 3, 250);
        }
        assert_eq!(out.iter().filter(|b| b.marker).count(), 1);
        assert!(out[2].marker);
    }

    #[test]
    fn init_reads_config_and_rate() {
        let mut p = AacParser::new(1440);
        let mut props = MediaProperties {
            sample_rate: Some(48000),
            extradata: vec![0x11, 0x90],
            ..Default::default()
        };
        p.init(&mut props).unwrap();
        assert_eq!(props.clock_rate, 48000);
        assert!(props.sdp_private.iter().any(|f| f == "config=1190"));
        assert!(props.sdp_private.iter().any(|f| f == "mode=AAC-hbr"));
    }

    #[test]
    fn truncated_adts_frame_is_damaged() {
        let mut frame = adts_frame(100);
        frame.truncate(50);
        let mut p = AacParser::new(1440);
        let unit = ElementaryPacket::new(frame, 0.0, 0.0);
        let err = p.parse(&unit, &mut MediaProperties::default()).unwrap_err();
        assert!(matches!(err, PlayoutError::Damaged(_)));
    }
}
