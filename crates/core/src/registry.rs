//! Write-once table of demuxer and media-parser variants.
//!
//! Built at startup, then shared read-only (`Arc<PluginRegistry>`) with
//! everything that binds resources to demuxers or tracks to parsers.

use crate::demux::{Demuxer, DemuxerDescriptor, InputStream, es, ogg};
use crate::error::{PlayoutError, Result};
use crate::media::{ParserDescriptor, aac, h264, speex};

#[derive(Debug, Default)]
pub struct PluginRegistry {
    demuxers: Vec<DemuxerDescriptor>,
    parsers: Vec<ParserDescriptor>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in demuxer and parser.
    ///
    /// Demuxer order: `ogg`, then `es`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register_demuxer(ogg::DESCRIPTOR)
            .register_demuxer(es::DESCRIPTOR)
            .register_parser(ParserDescriptor {
                info: &h264::INFO,
                create: h264::H264Parser::create,
            })
            .register_parser(ParserDescriptor {
                info: &aac::INFO,
                create: aac::AacParser::create,
            })
            .register_parser(ParserDescriptor {
                info: &speex::INFO,
                create: speex::SpeexParser::create,
            });
        registry
    }

    /// Append a demuxer; earlier registrations win during selection.
    pub fn register_demuxer(&mut self, descriptor: DemuxerDescriptor) -> &mut Self {
        tracing::debug!(demuxer = descriptor.short_name(), "demuxer registered");
        self.demuxers.push(descriptor);
        self
    }

    pub fn register_parser(&mut self, descriptor: ParserDescriptor) -> &mut Self {
        tracing::debug!(codec = descriptor.encoding_name(), "media parser registered");
        self.parsers.push(descriptor);
        self
    }

    pub fn demuxers(&self) -> &[DemuxerDescriptor] {
        &self.demuxers
    }

    pub fn parsers(&self) -> &[ParserDescriptor] {
        &self.parsers
    }

    /// First demuxer, in registration order, whose `probe` accepts `input`.
    ///
    /// The input is rewound to where it started after every probe.
    pub fn find_demuxer(&self, input: &mut InputStream) -> Result<Box<dyn Demuxer>> {
        let start = input.position()?;
        for descriptor in &self.demuxers {
            let demuxer = (descriptor.create)();
            let probed = demuxer.probe(input);
            input.seek_to(start)?;
            match probed {
                Ok(()) => {
                    tracing::debug!(
                        input = input.name(),
                        demuxer = descriptor.short_name(),
                        "demuxer bound"
                    );
                    return Ok(demuxer);
                }
                Err(e) => {
                    tracing::trace!(
                        input = input.name(),
                        demuxer = descriptor.short_name(),
                        reason = %e,
                        "probe rejected"
                    );
                }
            }
        }
        Err(PlayoutError::NotFound(input.name().to_string()))
    }

    /// Parser for an encoding name, compared case-insensitively.
    pub fn find_parser(&self, encoding_name: &str) -> Result<&ParserDescriptor> {
        self.parsers
            .iter()
            .find(|p| p.encoding_name().eq_ignore_ascii_case(encoding_name))
            .ok_or_else(|| PlayoutError::UnknownCodec(encoding_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_registered_in_order() {
        let r = PluginRegistry::with_defaults();
        let names: Vec<_> = r.demuxers().iter().map(|d| d.short_name()).collect();
        assert_eq!(names, ["ogg", "es"]);
        assert_eq!(r.parsers().len(), 3);
    }

    #[test]
    fn parser_lookup_ignores_case() {
        let r = PluginRegistry::with_defaults();
        assert_eq!(r.find_parser("h264").unwrap().encoding_name(), "H264");
        assert_eq!(r.find_parser("Speex").unwrap().encoding_name(), "SPEEX");
        assert!(matches!(
            r.find_parser("vorbis"),
            Err(PlayoutError::UnknownCodec(_))
        ));
    }

    #[test]
    fn unknown_input_is_not_found() {
        let r = PluginRegistry::with_defaults();
        let mut input = InputStream::from_bytes("blob.bin", vec![0u8; 32]);
        let err = r.find_demuxer(&mut input).err().unwrap();
        assert_eq!(err.status().as_str(), "not_found");
        assert_eq!(input.position().unwrap(), 0);
    }
}
