use std::collections::VecDeque;
use std::ops::BitOr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Demuxer, InputStream};
use crate::error::{PlayoutError, Result};
use crate::media::queue::{BufferConsumer, BufferProducer};
use crate::media::{ElementaryPacket, MediaParser, MediaProperties, MediaSource};
use crate::registry::PluginRegistry;

/// Most tracks a single resource may carry.
pub const MAX_TRACKS: usize = 20;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle of an open resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// A track, named by its resource and its position in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId {
    pub resource: ResourceId,
    pub index: usize,
}

/// Which derived timing fields the container provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatFlags(u8);

impl FormatFlags {
    pub const EMPTY: Self = Self(0);
    /// Packet duration is known (audio packets of fixed sample count).
    pub const PKT_LEN: Self = Self(1 << 0);
    /// A constant frame rate is known.
    pub const FRAME_RATE: Self = Self(1 << 1);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for FormatFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub name: String,
    /// Short name of the bound demuxer.
    pub demuxer: &'static str,
    /// Duration in seconds, when the container knows it.
    pub duration: Option<f64>,
    pub media_source: MediaSource,
    pub seekable: bool,
    pub flags: FormatFlags,
}

#[derive(Debug, Clone, Default)]
pub struct TrackInfo {
    pub name: String,
    /// Container-level stream identifier (e.g. Ogg serial number).
    pub id: u32,
}

/// One elementary stream within a resource.
///
/// Demuxers append [`ElementaryPacket`]s with [`push_packet`](Self::push_packet);
/// [`parse_next`](Self::parse_next) runs the bound parser over the oldest
/// one and hands the output to the track's buffer queue.
pub struct Track {
    id: TrackId,
    info: TrackInfo,
    properties: MediaProperties,
    parser: Box<dyn MediaParser>,
    pending: VecDeque<ElementaryPacket>,
    producer: BufferProducer,
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("codec", &self.properties.encoding_name)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Track {
    pub fn id(&self) -> TrackId {
        self.id
    }

    /// The resource this track belongs to.
    pub fn resource(&self) -> ResourceId {
        self.id.resource
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn properties(&self) -> &MediaProperties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut MediaProperties {
        &mut self.properties
    }

    /// Queue one demuxed unit and advance the track clock to it.
    pub fn push_packet(&mut self, unit: ElementaryPacket) {
        self.properties.pts = unit.pts;
        self.properties.dts = unit.dts;
        if unit.duration > 0.0 {
            self.properties.frame_duration = unit.duration;
        }
        self.pending.push_back(unit);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Parse the oldest pending unit.
    ///
    /// Returns the number of buffers queued, or `None` when nothing was
    /// pending. A failing unit is dropped; the next call moves on.
    pub fn parse_next(&mut self) -> Result<Option<usize>> {
        let Some(unit) = self.pending.pop_front() else {
            return Ok(None);
        };
        match self.parser.parse(&unit, &mut self.properties) {
            Ok(buffers) => {
                let count = buffers.len();
                self.producer.extend(buffers);
                tracing::trace!(
                    track = self.id.index,
                    buffers = count,
                    pts = unit.pts,
                    "unit parsed"
                );
                Ok(Some(count))
            }
            Err(e) => {
                tracing::warn!(
                    track = self.id.index,
                    codec = %self.properties.encoding_name,
                    bytes = unit.data.len(),
                    error = %e,
                    "elementary unit dropped"
                );
                Err(e)
            }
        }
    }

    /// Parse everything pending, skipping units the parser rejects.
    pub fn parse_pending(&mut self) -> usize {
        let mut produced = 0;
        while !self.pending.is_empty() {
            if let Ok(Some(count)) = self.parse_next() {
                produced += count;
            }
        }
        produced
    }

    /// New reader over this track's packetized output.
    pub fn subscribe(&self) -> BufferConsumer {
        self.producer.subscribe()
    }

    pub fn producer(&self) -> &BufferProducer {
        &self.producer
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.producer.reset();
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        if let Err(e) = self.parser.uninit() {
            tracing::warn!(track = self.id.index, error = %e, "parser uninit failed");
        }
    }
}

/// The part of a resource its demuxer works on.
#[derive(Debug)]
pub struct ResourceContext {
    id: ResourceId,
    info: ResourceInfo,
    input: InputStream,
    tracks: Vec<Track>,
    registry: Arc<PluginRegistry>,
    mtu: usize,
}

impl ResourceContext {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn info(&self) -> &ResourceInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut ResourceInfo {
        &mut self.info
    }

    pub fn input(&mut self) -> &mut InputStream {
        &mut self.input
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    /// Create a track and bind its media parser by encoding name.
    ///
    /// Returns the index of the new track.
    pub fn add_track(&mut self, info: TrackInfo, mut properties: MediaProperties) -> Result<usize> {
        if self.tracks.len() >= MAX_TRACKS {
            return Err(PlayoutError::TooManyTracks(MAX_TRACKS));
        }
        let descriptor = self.registry.find_parser(&properties.encoding_name)?;
        let mut parser = (descriptor.create)(self.mtu);
        parser.init(&mut properties)?;

        let index = self.tracks.len();
        tracing::info!(
            resource = self.id.get(),
            track = index,
            name = %info.name,
            codec = descriptor.encoding_name(),
            clock_rate = properties.clock_rate,
            "track added"
        );
        self.tracks.push(Track {
            id: TrackId {
                resource: self.id,
                index,
            },
            info,
            properties,
            parser,
            pending: VecDeque::new(),
            producer: BufferProducer::new(),
        });
        Ok(index)
    }
}

/// One open media source bound to the demuxer that recognised it.
pub struct Resource {
    demuxer: Box<dyn Demuxer>,
    ctx: ResourceContext,
    closed: bool,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("demuxer", &self.demuxer.info().short_name)
            .field("ctx", &self.ctx)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Resource {
    /// Select a demuxer for `input` and run its `init`.
    pub fn open(input: InputStream, registry: &Arc<PluginRegistry>, mtu: usize) -> Result<Self> {
        let mut input = input;
        let mut demuxer = registry.find_demuxer(&mut input)?;
        let name = input.name().to_string();
        let mut ctx = ResourceContext {
            id: ResourceId::next(),
            info: ResourceInfo {
                name,
                demuxer: demuxer.info().short_name,
                duration: None,
                media_source: MediaSource::Stored,
                seekable: false,
                flags: FormatFlags::EMPTY,
            },
            input,
            tracks: Vec::new(),
            registry: Arc::clone(registry),
            mtu,
        };
        let opened = demuxer.init(&mut ctx).and_then(|()| {
            if ctx.tracks.is_empty() {
                return Err(PlayoutError::Damaged(format!(
                    "{}: no playable tracks",
                    ctx.info.name
                )));
            }
            Ok(())
        });
        if let Err(e) = opened {
            if let Err(uninit) = demuxer.uninit(&mut ctx) {
                tracing::warn!(error = %uninit, "demuxer uninit failed");
            }
            return Err(e);
        }
        tracing::info!(
            resource = ctx.id.get(),
            name = %ctx.info.name,
            demuxer = ctx.info.demuxer,
            tracks = ctx.tracks.len(),
            seekable = ctx.info.seekable,
            "resource opened"
        );
        Ok(Self {
            demuxer,
            ctx,
            closed: false,
        })
    }

    pub fn id(&self) -> ResourceId {
        self.ctx.id
    }

    pub fn info(&self) -> &ResourceInfo {
        &self.ctx.info
    }

    pub fn tracks(&self) -> &[Track] {
        &self.ctx.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.ctx.tracks.get(index)
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.ctx.tracks.get_mut(index)
    }

    /// Demux one elementary packet into its track's pending queue.
    ///
    /// At end of stream every track's pending units are parsed and its
    /// buffer queue is marked finished.
    pub fn read_packet(&mut self) -> Result<()> {
        if self.closed {
            return Err(PlayoutError::EndOfStream);
        }
        match self.demuxer.read_packet(&mut self.ctx) {
            Err(PlayoutError::EndOfStream) => {
                for track in &mut self.ctx.tracks {
                    track.parse_pending();
                    track.producer.finish();
                }
                tracing::debug!(resource = self.ctx.id.get(), "end of stream");
                Err(PlayoutError::EndOfStream)
            }
            other => other,
        }
    }

    /// Read one packet and parse whatever it produced.
    ///
    /// Units the parser rejects are dropped and logged; the returned count
    /// covers buffers actually queued.
    pub fn pump(&mut self) -> Result<usize> {
        self.read_packet()?;
        Ok(self.ctx.tracks.iter_mut().map(Track::parse_pending).sum())
    }

    /// Reposition every track to `time` seconds and flush queued output.
    pub fn seek(&mut self, time: f64) -> Result<()> {
        self.demuxer.seek(&mut self.ctx, time)?;
        for track in &mut self.ctx.tracks {
            track.flush();
        }
        tracing::debug!(resource = self.ctx.id.get(), time, "resource seeked");
        Ok(())
    }

    /// Release the demuxer. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        tracing::debug!(resource = self.ctx.id.get(), "resource closed");
        self.demuxer.uninit(&mut self.ctx)
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(resource = self.ctx.id.get(), error = %e, "demuxer uninit failed");
        }
    }
}
