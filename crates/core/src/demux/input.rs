use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{PlayoutError, Result};

/// Byte source a demuxer can read and reposition.
pub trait MediaInput: Read + Seek + Send {}

impl<T: Read + Seek + Send> MediaInput for T {}

/// Named, seekable byte stream handed to demuxers.
///
/// Short reads at the end of the data surface as
/// [`PlayoutError::EndOfStream`], so demuxers can tell a clean end from an
/// I/O failure with a single match.
pub struct InputStream {
    name: String,
    inner: Box<dyn MediaInput>,
    len: u64,
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream")
            .field("name", &self.name)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl InputStream {
    pub fn new(name: impl Into<String>, mut inner: Box<dyn MediaInput>) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            name: name.into(),
            inner,
            len,
        })
    }

    /// Open a file. The stream name is the path as given.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        tracing::debug!(path = %path.display(), "input opened");
        Self::new(path.display().to_string(), Box::new(BufReader::new(file)))
    }

    /// In-memory stream; `name` still drives extension-based probing.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self {
            name: name.into(),
            inner: Box::new(Cursor::new(data)),
            len,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower-cased file extension of the stream name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// Total length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn is_eof(&mut self) -> Result<bool> {
        Ok(self.position()? >= self.len)
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.seek_to(0)
    }

    /// Fill `buf` completely or fail with `EndOfStream`.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => PlayoutError::EndOfStream,
            _ => PlayoutError::Io(e),
        })
    }

    /// Read up to `n` bytes; fewer only at end of stream.
    pub fn read_up_to(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(n);
        (&mut self.inner).take(n as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Read everything from the current position to the end.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Look at up to `n` bytes without moving the cursor.
    pub fn peek(&mut self, n: usize) -> Result<Vec<u8>> {
        let pos = self.position()?;
        let data = self.read_up_to(n);
        self.seek_to(pos)?;
        data
    }
}
