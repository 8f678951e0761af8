//! Integration tests: demuxer selection, parse pipeline and resource
//! lifecycle, driven through the public API only.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use playout::demux::{
    Demuxer, DemuxerDescriptor, DemuxerInfo, InputStream, ResourceContext, TrackInfo,
};
use playout::media::MediaProperties;
use playout::{PlayoutError, PluginRegistry, Resource, Result, Status};

use common::{RAW_INFO, TaggedDemuxer, raw_descriptor, registry, tagged, tagged_descriptor};

fn open(units: &[Vec<u8>], registry: PluginRegistry, mtu: usize) -> Result<Resource> {
    let input = InputStream::from_bytes("clip.tag", tagged(units));
    Resource::open(input, &Arc::new(registry), mtu)
}

#[test]
fn oversized_unit_is_dropped_and_pipeline_continues() {
    let units = vec![vec![1u8; 100], vec![2u8; 2000], vec![3u8; 50]];
    let mut resource = open(&units, registry(), 1500).unwrap();
    assert_eq!(resource.info().demuxer, "tagged");
    let mut consumer = resource.track(0).unwrap().subscribe();

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        resource.read_packet().unwrap();
        let track = resource.track_mut(0).unwrap();
        let result = track.parse_next();
        outcomes.push(Status::from(&result).as_str());
    }
    assert_eq!(outcomes, ["ok", "alloc_error", "ok"]);
    assert!(resource.read_packet().unwrap_err().is_end_of_stream());

    let mut sizes = Vec::new();
    while let Some(buffer) = consumer.current() {
        assert!(buffer.marker);
        sizes.push(buffer.payload.len());
        consumer.advance();
    }
    assert_eq!(sizes, [100, 50]);
    assert!(consumer.is_drained());
}

#[test]
fn pump_counts_only_queued_buffers() {
    let units = vec![vec![1u8; 10], vec![2u8; 600], vec![3u8; 10]];
    let mut resource = open(&units, registry(), 500).unwrap();
    let _consumer = resource.track(0).unwrap().subscribe();
    let mut queued = Vec::new();
    loop {
        match resource.pump() {
            Ok(n) => queued.push(n),
            Err(e) if e.is_end_of_stream() => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(queued, [1, 0, 1]);
    assert_eq!(resource.track(0).unwrap().producer().len(), 2);
    assert!(resource.track(0).unwrap().producer().is_finished());
}

#[test]
fn unplayed_track_holds_no_buffers() {
    let units = vec![vec![5u8; 20]; 500];
    let mut resource = open(&units, registry(), 1500).unwrap();
    drop(resource.track(0).unwrap().subscribe());
    let mut queued = 0;
    while let Ok(n) = resource.pump() {
        queued += n;
    }
    assert_eq!(queued, 500);
    assert!(resource.track(0).unwrap().producer().is_empty());
}

#[test]
fn unknown_input_is_not_found() {
    let input = InputStream::from_bytes("noise.bin", vec![0u8; 64]);
    let err = Resource::open(input, &Arc::new(registry()), 1500).unwrap_err();
    assert_eq!(err.status(), Status::NotFound);
}

static UNINIT_CALLS: AtomicUsize = AtomicUsize::new(0);

/// `tagged` demuxer that counts `uninit` calls.
#[derive(Default)]
struct Counting(TaggedDemuxer);

impl Demuxer for Counting {
    fn info(&self) -> &'static DemuxerInfo {
        self.0.info()
    }

    fn probe(&self, input: &mut InputStream) -> Result<()> {
        self.0.probe(input)
    }

    fn init(&mut self, resource: &mut ResourceContext) -> Result<()> {
        self.0.init(resource)
    }

    fn read_packet(&mut self, resource: &mut ResourceContext) -> Result<()> {
        self.0.read_packet(resource)
    }

    fn seek(&mut self, resource: &mut ResourceContext, time: f64) -> Result<()> {
        self.0.seek(resource, time)
    }

    fn uninit(&mut self, _resource: &mut ResourceContext) -> Result<()> {
        UNINIT_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn uninit_runs_once() {
    let mut registry = PluginRegistry::new();
    registry
        .register_demuxer(DemuxerDescriptor {
            info: &common::TAGGED_INFO,
            create: || Box::new(Counting::default()),
        })
        .register_parser(raw_descriptor());

    let mut resource = open(&[vec![0u8; 4]], registry, 1500).unwrap();
    resource.close().unwrap();
    resource.close().unwrap();
    assert!(resource.read_packet().unwrap_err().is_end_of_stream());
    drop(resource);
    assert_eq!(UNINIT_CALLS.load(Ordering::SeqCst), 1);
}

static EMPTY_UNINITS: AtomicUsize = AtomicUsize::new(0);

/// `tagged` demuxer whose `init` finds no tracks, or fails after adding one.
struct Failing {
    add_then_fail: bool,
}

impl Demuxer for Failing {
    fn info(&self) -> &'static DemuxerInfo {
        &common::TAGGED_INFO
    }

    fn probe(&self, input: &mut InputStream) -> Result<()> {
        TaggedDemuxer::default().probe(input)
    }

    fn init(&mut self, resource: &mut ResourceContext) -> Result<()> {
        if self.add_then_fail {
            TaggedDemuxer::default().init(resource)?;
            return Err(PlayoutError::Damaged("truncated header".into()));
        }
        Ok(())
    }

    fn read_packet(&mut self, _resource: &mut ResourceContext) -> Result<()> {
        Err(PlayoutError::EndOfStream)
    }

    fn seek(&mut self, _resource: &mut ResourceContext, _time: f64) -> Result<()> {
        Err(PlayoutError::NotSeekable)
    }

    fn uninit(&mut self, _resource: &mut ResourceContext) -> Result<()> {
        EMPTY_UNINITS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn failed_open_still_uninits() {
    let mut no_tracks = PluginRegistry::new();
    no_tracks
        .register_demuxer(DemuxerDescriptor {
            info: &common::TAGGED_INFO,
            create: || Box::new(Failing { add_then_fail: false }),
        })
        .register_parser(raw_descriptor());
    let err = open(&[], no_tracks, 1500).unwrap_err();
    assert_eq!(err.status(), Status::Damaged);
    assert_eq!(EMPTY_UNINITS.load(Ordering::SeqCst), 1);

    let mut init_fails = PluginRegistry::new();
    init_fails
        .register_demuxer(DemuxerDescriptor {
            info: &common::TAGGED_INFO,
            create: || Box::new(Failing { add_then_fail: true }),
        })
        .register_parser(raw_descriptor());
    let err = open(&[], init_fails, 1500).unwrap_err();
    assert_eq!(err.status(), Status::Damaged);
    assert_eq!(EMPTY_UNINITS.load(Ordering::SeqCst), 2);
}

static GREEDY_INFO: DemuxerInfo = DemuxerInfo {
    name: "Greedy",
    short_name: "greedy",
    author: "playout",
    comment: "accepts anything",
    extensions: &[],
};

/// Accepts every input and exposes one RAW track.
struct Greedy;

impl Demuxer for Greedy {
    fn info(&self) -> &'static DemuxerInfo {
        &GREEDY_INFO
    }

    fn probe(&self, _input: &mut InputStream) -> Result<()> {
        Ok(())
    }

    fn init(&mut self, resource: &mut ResourceContext) -> Result<()> {
        let properties = MediaProperties {
            encoding_name: RAW_INFO.encoding_name.to_lowercase(),
            ..Default::default()
        };
        resource.add_track(TrackInfo::default(), properties)?;
        Ok(())
    }

    fn read_packet(&mut self, _resource: &mut ResourceContext) -> Result<()> {
        Err(PlayoutError::EndOfStream)
    }

    fn seek(&mut self, _resource: &mut ResourceContext, _time: f64) -> Result<()> {
        Err(PlayoutError::NotSeekable)
    }
}

fn greedy_descriptor() -> DemuxerDescriptor {
    DemuxerDescriptor {
        info: &GREEDY_INFO,
        create: || Box::new(Greedy),
    }
}

#[test]
fn first_registered_demuxer_wins() {
    let mut tagged_first = PluginRegistry::new();
    tagged_first
        .register_demuxer(tagged_descriptor())
        .register_demuxer(greedy_descriptor())
        .register_parser(raw_descriptor());
    let resource = open(&[], tagged_first, 1500).unwrap();
    assert_eq!(resource.info().demuxer, "tagged");

    let mut greedy_first = PluginRegistry::new();
    greedy_first
        .register_demuxer(greedy_descriptor())
        .register_demuxer(tagged_descriptor())
        .register_parser(raw_descriptor());
    let resource = open(&[], greedy_first, 1500).unwrap();
    assert_eq!(resource.info().demuxer, "greedy");
    // parser lookup ignores case
    assert_eq!(resource.track(0).unwrap().properties().encoding_name, "raw");
}

#[test]
fn track_without_parser_is_unknown_codec() {
    let mut registry = PluginRegistry::new();
    registry.register_demuxer(tagged_descriptor());
    let err = open(&[], registry, 1500).unwrap_err();
    assert!(matches!(err, PlayoutError::UnknownCodec(_)));
}

#[test]
fn builtin_registry_opens_ogg_speex() {
    use common::{ogg_page, speex_header};
    use playout::demux::ogg::FLAG_BOS;

    let mut data = ogg_page(7, 0, FLAG_BOS, 0, &[&speex_header(8000, 160, 1)]);
    data.extend(ogg_page(7, 1, 0, 0, &[b"comments"]));
    data.extend(ogg_page(7, 2, 0, 320, &[&[0xAAu8; 38], &[0xBBu8; 38]]));

    let input = InputStream::from_bytes("voice.spx", data);
    let registry = Arc::new(PluginRegistry::with_defaults());
    let mut resource = Resource::open(input, &registry, 1440).unwrap();
    let _consumer = resource.track(0).unwrap().subscribe();
    assert_eq!(resource.info().demuxer, "ogg");
    let track = resource.track(0).unwrap();
    assert_eq!(track.properties().encoding_name, "SPEEX");
    assert_eq!(track.properties().clock_rate, 8000);

    let mut queued = 0;
    while let Ok(n) = resource.pump() {
        queued += n;
    }
    assert_eq!(queued, 2);
}
