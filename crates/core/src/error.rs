//! Error types for the playout core.

use std::fmt;

/// Errors that can occur in the delivery core.
///
/// Variants group into the outcome classes callers branch on:
///
/// - **Format/content**: [`NotFound`](Self::NotFound),
///   [`Damaged`](Self::Damaged), [`NotParseable`](Self::NotParseable),
///   [`NotSeekable`](Self::NotSeekable), [`EndOfStream`](Self::EndOfStream).
///   Expected per-resource outcomes; the caller decides whether to try the
///   next plugin, drop the session or log.
/// - **Capacity**: [`NoCapacity`](Self::NoCapacity): the slot table is full.
/// - **Resource exhaustion**: [`AllocError`](Self::AllocError): the current
///   parse unit is dropped, parser state stays intact.
/// - **Contract violations**: [`BitstreamOverrun`](Self::BitstreamOverrun),
///   [`InvalidSlot`](Self::InvalidSlot), [`StaleSlot`](Self::StaleSlot).
#[derive(Debug, thiserror::Error)]
pub enum PlayoutError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No registered demuxer recognised the input.
    #[error("no demuxer found for {0}")]
    NotFound(String),

    /// The input looked like a known format but is structurally invalid.
    #[error("damaged resource: {0}")]
    Damaged(String),

    /// The demuxer could not extract a packet at the current position.
    #[error("packet not parseable: {0}")]
    NotParseable(String),

    /// The format has no seek index.
    #[error("resource not seekable")]
    NotSeekable,

    /// A parse unit could not be turned into packets (e.g. larger than the MTU).
    #[error("allocation error: {0}")]
    AllocError(String),

    /// Every slot of the scheduler table is occupied.
    #[error("no free scheduler slot (capacity {0})")]
    NoCapacity(usize),

    /// The input has no more packets.
    #[error("end of stream")]
    EndOfStream,

    /// A bitstream read went past the end of its buffer.
    #[error("bitstream overrun: {bits} bits at offset {offset} in {len} bytes")]
    BitstreamOverrun { offset: usize, bits: u32, len: usize },

    /// A slot index outside the scheduler table.
    #[error("invalid slot index {0}")]
    InvalidSlot(usize),

    /// The slot was released (and possibly re-used) since the id was issued.
    #[error("stale slot id {0}")]
    StaleSlot(usize),

    /// A resource already holds the maximum number of tracks.
    #[error("too many tracks (max {0})")]
    TooManyTracks(usize),

    /// No media parser is registered for an encoding name.
    #[error("no media parser for encoding {0}")]
    UnknownCodec(String),

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl PlayoutError {
    /// Stable status word used at the session-control boundary.
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound(_) | Self::UnknownCodec(_) => Status::NotFound,
            Self::Damaged(_) | Self::TooManyTracks(_) => Status::Damaged,
            Self::NotParseable(_) | Self::BitstreamOverrun { .. } | Self::Io(_) => {
                Status::NotParseable
            }
            Self::NotSeekable => Status::NotSeekable,
            Self::AllocError(_) => Status::AllocError,
            Self::NoCapacity(_) | Self::AlreadyRunning => Status::NoCapacity,
            Self::EndOfStream => Status::EndOfStream,
            Self::InvalidSlot(_) | Self::StaleSlot(_) => Status::NotFound,
        }
    }

    /// Whether this error ends the stream rather than a single unit.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// Result vocabulary shared with the session-control and description layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    Damaged,
    NotParseable,
    NotSeekable,
    AllocError,
    NoCapacity,
    EndOfStream,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFound => "not_found",
            Self::Damaged => "damaged",
            Self::NotParseable => "not_parseable",
            Self::NotSeekable => "not_seekable",
            Self::AllocError => "alloc_error",
            Self::NoCapacity => "no_capacity",
            Self::EndOfStream => "end_of_stream",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(e) => e.status(),
        }
    }
}

/// Convenience alias for `Result<T, PlayoutError>`.
pub type Result<T> = std::result::Result<T, PlayoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_words_are_stable() {
        assert_eq!(PlayoutError::NotSeekable.status().as_str(), "not_seekable");
        assert_eq!(PlayoutError::NoCapacity(2).status().as_str(), "no_capacity");
        assert_eq!(PlayoutError::EndOfStream.status().as_str(), "end_of_stream");
        assert_eq!(
            PlayoutError::AllocError("unit too large".into()).status().to_string(),
            "alloc_error"
        );
    }

    #[test]
    fn status_from_result() {
        let ok: Result<()> = Ok(());
        assert_eq!(Status::from(&ok), Status::Ok);
        let err: Result<()> = Err(PlayoutError::Damaged("bad page".into()));
        assert_eq!(Status::from(&err), Status::Damaged);
    }
}
