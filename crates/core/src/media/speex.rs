use super::{
    ElementaryPacket, MediaParser, MediaParserInfo, MediaProperties, MediaType, PacketizedBuffer,
    check_mtu,
};
use crate::error::Result;

pub static INFO: MediaParserInfo = MediaParserInfo {
    encoding_name: "SPEEX",
    media_type: MediaType::Audio,
};

/// Samples per Speex frame in narrowband mode; wideband modes scale it.
const NB_FRAME_SIZE: u32 = 160;

/// Speex payload parser (RFC 5574).
///
/// Each demuxed unit is already a whole Speex packet, so it travels as one
/// payload. Units larger than the MTU are rejected and dropped: this variant
/// does not fragment.
#[derive(Debug)]
pub struct SpeexParser {
    mtu: usize,
}

impl SpeexParser {
    pub fn new(mtu: usize) -> Self {
        Self { mtu }
    }

    pub fn create(mtu: usize) -> Box<dyn MediaParser> {
        Box::new(Self::new(mtu))
    }
}

impl MediaParser for SpeexParser {
    fn info(&self) -> &'static MediaParserInfo {
        &INFO
    }

    fn init(&mut self, properties: &mut MediaProperties) -> Result<()> {
        properties.media_type = MediaType::Audio;
        let sample_rate = properties.sample_rate.unwrap_or(8000);
        properties.clock_rate = sample_rate;
        if properties.frame_duration <= 0.0 {
            let frame_size = NB_FRAME_SIZE * (sample_rate / 8000).max(1);
            properties.frame_duration = frame_size as f64 / sample_rate as f64;
        }
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
        if let Err(e) = check_mtu(INFO.encoding_name, frame.len(), self.mtu) {
            tracing::warn!(bytes = frame.len(), mtu = self.mtu, "Speex unit dropped");
            return Err(e);
        }
        out.push(PacketizedBuffer::from_unit(unit, frame.to_vec(), last));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlayoutError;

    #[test]
    fn unit_within_mtu_is_one_payload() {
        let mut p = SpeexParser::new(1500);
        let unit = ElementaryPacket::new(vec![7u8; 100], 0.02, 0.02);
        let out = p.parse(&unit, &mut MediaProperties::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.len(), 100);
        assert!(out[0].marker);
    }

    #[test]
    fn oversized_unit_rejected_then_recovers() {
        let mut p = SpeexParser::new(1500);
        let mut props = MediaProperties::default();

        let big = ElementaryPacket::new(vec![0u8; 2000], 0.0, 0.02);
        let err = p.parse(&big, &mut props).unwrap_err();
        assert!(matches!(err, PlayoutError::AllocError(_)));

        let small = ElementaryPacket::new(vec![1u8; 50], 0.02, 0.02);
        assert_eq!(p.parse(&small, &mut props).unwrap().len(), 1);
    }

    #[test]
    fn init_derives_frame_duration() {
        let mut props = MediaProperties {
            sample_rate: Some(16000),
            ..Default::default()
        };
        SpeexParser::new(1440).init(&mut props).unwrap();
        assert_eq!(props.clock_rate, 16000);
        assert!((props.frame_duration - 0.02).abs() < 1e-9);
    }
}
