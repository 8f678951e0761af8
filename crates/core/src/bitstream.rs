//! Bit-granular field extraction for container and codec header parsing.
//!
//! Fields are read most-significant-bit first, the order used by every
//! MPEG/ITU bitstream syntax:
//!
//! ```text
//! byte:     0               1
//! bit:      7 6 5 4 3 2 1 0 7 6 5 4 3 2 1 0
//! offset:   0 1 2 3 4 5 6 7 8 9 ...
//! ```
//!
//! Whole bytes are consumed with a single shift when the cursor is
//! byte-aligned and at least 8 bits remain; everything else goes one bit at
//! a time. Reads past the end of the buffer are rejected up front with
//! [`PlayoutError::BitstreamOverrun`] instead of touching memory.

use crate::error::{PlayoutError, Result};

/// Widest field a single read can return.
pub const MAX_FIELD_BITS: u32 = 32;

/// Read `bits` bits (0–32) from `data` at bit `offset`, advancing the offset.
///
/// The offset is left untouched when the read is rejected.
pub fn get_field(data: &[u8], bits: u32, offset: &mut usize) -> Result<u32> {
    if bits > MAX_FIELD_BITS || offset.saturating_add(bits as usize) > data.len() * 8 {
        return Err(PlayoutError::BitstreamOverrun {
            offset: *offset,
            bits,
            len: data.len(),
        });
    }

    let mut value: u64 = 0;
    let mut read = 0u32;
    while read < bits {
        let byte = data[*offset / 8];
        if bits - read >= 8 && *offset % 8 == 0 {
            value = (value << 8) | byte as u64;
            read += 8;
            *offset += 8;
        } else {
            value = (value << 1) | ((byte >> (7 - *offset % 8)) & 1) as u64;
            read += 1;
            *offset += 1;
        }
    }
    Ok(value as u32)
}

/// Cursor over a byte buffer for sequential field reads.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Start reading at an arbitrary bit offset.
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    /// Current bit offset from the start of the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bits left before the end of the buffer.
    pub fn remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.offset)
    }

    pub fn read(&mut self, bits: u32) -> Result<u32> {
        get_field(self.data, bits, &mut self.offset)
    }

    pub fn read_flag(&mut self) -> Result<bool> {
        Ok(self.read(1)? == 1)
    }

    pub fn skip(&mut self, bits: usize) -> Result<()> {
        if bits > self.remaining() {
            return Err(PlayoutError::BitstreamOverrun {
                offset: self.offset,
                bits: bits.min(u32::MAX as usize) as u32,
                len: self.data.len(),
            });
        }
        self.offset += bits;
        Ok(())
    }

    /// Unsigned Exp-Golomb code (H.264 §9.1), used by SPS fields.
    pub fn read_ue(&mut self) -> Result<u32> {
        let start = self.offset;
        let mut zeros = 0u32;
        while !self.read_flag()? {
            zeros += 1;
            if zeros > 31 {
                self.offset = start;
                return Err(PlayoutError::BitstreamOverrun {
                    offset: start,
                    bits: zeros,
                    len: self.data.len(),
                });
            }
        }
        if zeros == 0 {
            return Ok(0);
        }
        match self.read(zeros) {
            Ok(suffix) => Ok(((1u64 << zeros) - 1 + suffix as u64) as u32),
            Err(e) => {
                self.offset = start;
                Err(e)
            }
        }
    }
}
