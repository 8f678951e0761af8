//! Demuxer plugins: container bytes in, per-track elementary packets out.
//!
//! Every container format implements [`Demuxer`]. Variants are registered
//! once as [`DemuxerDescriptor`]s in a
//! [`PluginRegistry`](crate::registry::PluginRegistry); opening a
//! [`Resource`] walks the registry in registration order and binds the
//! first variant whose `probe` accepts the input.
//!
//! ## Lifecycle
//!
//! ```text
//! probe ─ok─► init ─ok─► read_packet* ─► uninit
//!               │            ▲   │
//!               │            └─seek
//!               └─damaged─► (resource not opened)
//! ```
//!
//! `uninit` runs exactly once per bound demuxer, from
//! [`Resource::close`] or from the resource's `Drop`.

pub mod es;
pub mod input;
pub mod ogg;
pub mod resource;

pub use input::{InputStream, MediaInput};
pub use resource::{
    FormatFlags, MAX_TRACKS, Resource, ResourceContext, ResourceId, ResourceInfo, Track, TrackId,
    TrackInfo,
};

use crate::error::Result;

/// Static metadata of a demuxer variant.
#[derive(Debug)]
pub struct DemuxerInfo {
    pub name: &'static str,
    pub short_name: &'static str,
    pub author: &'static str,
    pub comment: &'static str,
    /// Extensions this variant usually handles, lower-case, without dot.
    pub extensions: &'static [&'static str],
}

/// One container-format variant bound to a single resource.
pub trait Demuxer: Send {
    fn info(&self) -> &'static DemuxerInfo;

    /// Decide whether this variant handles `input`.
    ///
    /// Must leave the input where it found it; only [`InputStream::peek`]
    /// style reads are allowed. Any error means "not mine".
    fn probe(&self, input: &mut InputStream) -> Result<()>;

    /// Read container headers and create the resource's tracks.
    ///
    /// Fails with [`Damaged`](crate::PlayoutError::Damaged) when the input
    /// looks like this format but is structurally invalid.
    fn init(&mut self, resource: &mut ResourceContext) -> Result<()>;

    /// Append one elementary packet to the pending queue of its track.
    ///
    /// Returns [`EndOfStream`](crate::PlayoutError::EndOfStream) when the
    /// input is exhausted and
    /// [`NotParseable`](crate::PlayoutError::NotParseable) when nothing
    /// could be extracted at the current position.
    fn read_packet(&mut self, resource: &mut ResourceContext) -> Result<()>;

    /// Reposition to `time` seconds.
    ///
    /// Formats without a seek index report
    /// [`NotSeekable`](crate::PlayoutError::NotSeekable) rather than
    /// approximating.
    fn seek(&mut self, resource: &mut ResourceContext, time: f64) -> Result<()>;

    fn uninit(&mut self, _resource: &mut ResourceContext) -> Result<()> {
        Ok(())
    }
}

/// Process-wide descriptor of a demuxer variant.
#[derive(Debug, Clone, Copy)]
pub struct DemuxerDescriptor {
    pub info: &'static DemuxerInfo,
    pub create: fn() -> Box<dyn Demuxer>,
}

impl DemuxerDescriptor {
    pub fn short_name(&self) -> &'static str {
        self.info.short_name
    }
}
