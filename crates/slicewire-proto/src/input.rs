//! Decode cursor mirroring [`crate::OutputStream`].

use bytes::Bytes;

use crate::{
    errors::{ProtocolError, Result},
    output::SIZE_ESCAPE,
};

/// Bounds-checked reader over a shared byte buffer.
///
/// Sub-streams produced by [`Self::split`] share the underlying allocation
/// and report offsets relative to the outermost buffer, so error positions
/// always point into the original message.
#[derive(Debug, Clone)]
pub struct InputStream {
    data: Bytes,
    pos: usize,
    base: usize,
}

impl InputStream {
    /// Reader over `data` starting at offset zero.
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0, base: 0 }
    }

    /// Absolute offset of the next byte to be read.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True if every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                offset: self.offset(),
                needed: n,
                remaining: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8> {
        self.data.get(self.pos).copied().ok_or(ProtocolError::Truncated {
            offset: self.offset(),
            needed: 1,
            remaining: 0,
        })
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a bool; any nonzero byte is `true`.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read an i16.
    pub fn read_i16(&mut self) -> Result<i16> {
        self.take_array().map(i16::from_le_bytes)
    }

    /// Read an i32.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.take_array().map(i32::from_le_bytes)
    }

    /// Read an i64.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.take_array().map(i64::from_le_bytes)
    }

    /// Read an f32.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.take_array().map(f32::from_le_bytes)
    }

    /// Read an f64.
    pub fn read_f64(&mut self) -> Result<f64> {
        self.take_array().map(f64::from_le_bytes)
    }

    /// Read a u32 byte length.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.take_array().map(u32::from_le_bytes)
    }

    /// Read a compact size.
    ///
    /// # Errors
    ///
    /// `Corrupt` if the escaped form carries a negative value.
    pub fn read_size(&mut self) -> Result<usize> {
        let offset = self.offset();
        let first = self.read_u8()?;
        if first != SIZE_ESCAPE {
            return Ok(usize::from(first));
        }

        let wide = self.read_i32()?;
        usize::try_from(wide).map_err(|_| ProtocolError::corrupt(offset, "negative size"))
    }

    /// Read a size-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_size()?;
        let offset = self.offset();
        let bytes = self.take(len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(_) => Err(ProtocolError::corrupt(offset, "string is not valid UTF-8")),
        }
    }

    /// Read `n` raw bytes without copying.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        self.take(n)?;
        Ok(self.data.slice(self.pos - n..self.pos))
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Split off the next `n` bytes as a bounded sub-stream and advance past
    /// them.
    pub fn split(&mut self, n: usize) -> Result<Self> {
        let base = self.offset();
        let data = self.read_bytes(n)?;
        Ok(Self { data, pos: 0, base })
    }

    /// Check that `count` elements of at least `min_size` bytes each could
    /// still fit, before allocating for them.
    pub fn check_sequence(&self, count: usize, min_size: usize) -> Result<()> {
        let needed = count.saturating_mul(min_size);
        if needed > self.remaining() {
            return Err(ProtocolError::Truncated {
                offset: self.offset(),
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }
}
