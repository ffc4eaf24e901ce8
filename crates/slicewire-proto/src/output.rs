//! Append-only encode buffer.

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

/// Sizes below this value are written as a single byte.
pub const SIZE_ESCAPE: u8 = 0xFF;

/// Position of a reserved u32 length field awaiting its back-patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a reserved length must be patched"]
pub struct LengthSlot(usize);

/// Append-only byte writer with primitive-width helpers.
///
/// Integers and floats are fixed-width little endian. Sizes (counts and
/// lengths) use the compact form: one byte below 255, otherwise `0xFF`
/// followed by an i32.
#[derive(Debug, Default)]
pub struct OutputStream {
    buf: BytesMut,
}

impl OutputStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty stream with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity) }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View of the bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Write one byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Write a bool as one byte (`0` or `1`).
    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Write an i16.
    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    /// Write an i32.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    /// Write an i64.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    /// Write an f32.
    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    /// Write an f64.
    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// Write a u32, used for byte lengths.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    /// Write a compact size.
    ///
    /// # Errors
    ///
    /// `SizeOverflow` if `size` exceeds `i32::MAX`.
    pub fn write_size(&mut self, size: usize) -> Result<()> {
        if size < usize::from(SIZE_ESCAPE) {
            self.buf.put_u8(size as u8);
            return Ok(());
        }

        let wide = i32::try_from(size).map_err(|_| ProtocolError::SizeOverflow { size })?;
        self.buf.put_u8(SIZE_ESCAPE);
        self.buf.put_i32_le(wide);
        Ok(())
    }

    /// Write raw bytes without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Write a size-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_size(value.len())?;
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    /// Write a size-prefixed sequence, calling `element` once per index.
    pub fn write_sequence<E, F>(&mut self, len: usize, mut element: F) -> std::result::Result<(), E>
    where
        E: From<ProtocolError>,
        F: FnMut(&mut Self, usize) -> std::result::Result<(), E>,
    {
        self.write_size(len)?;
        for index in 0..len {
            element(self, index)?;
        }
        Ok(())
    }

    /// Reserve a u32 length field to be filled in by [`Self::patch_length`].
    pub fn reserve_length(&mut self) -> LengthSlot {
        let slot = LengthSlot(self.buf.len());
        self.buf.put_u32_le(0);
        slot
    }

    /// Back-patch a reserved length with the number of bytes written since
    /// it was reserved. Returns the patched length.
    ///
    /// # Errors
    ///
    /// `SizeOverflow` if the payload does not fit in a u32.
    pub fn patch_length(&mut self, slot: LengthSlot) -> Result<usize> {
        let start = slot.0 + 4;
        let len = self.buf.len() - start;
        let value = u32::try_from(len).map_err(|_| ProtocolError::SizeOverflow { size: len })?;
        self.buf[slot.0..start].copy_from_slice(&value.to_le_bytes());
        Ok(len)
    }

    /// Overwrite bytes at `offset`, used to fill in a header once the total
    /// size is known.
    ///
    /// # Errors
    ///
    /// `Corrupt` if the range lies beyond what has been written.
    pub fn overwrite(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len();
        if end > self.buf.len() {
            return Err(ProtocolError::corrupt(offset, "overwrite past end of stream"));
        }
        self.buf[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Consume the stream and return the encoded bytes.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn small_size_is_one_byte() {
        let mut out = OutputStream::new();
        out.write_size(254).unwrap();
        assert_eq!(out.as_slice(), &[254]);
    }

    #[test]
    fn large_size_is_escaped() {
        let mut out = OutputStream::new();
        out.write_size(255).unwrap();
        assert_eq!(out.as_slice(), &hex!("ff ff 00 00 00"));
    }

    #[test]
    fn string_is_size_prefixed() {
        let mut out = OutputStream::new();
        out.write_string("abc").unwrap();
        assert_eq!(out.as_slice(), b"\x03abc");
    }

    #[test]
    fn patch_length_counts_bytes_after_slot() {
        let mut out = OutputStream::new();
        out.write_u8(0xAA);
        let slot = out.reserve_length();
        out.write_raw(&[1, 2, 3]);
        assert_eq!(out.patch_length(slot).unwrap(), 3);
        assert_eq!(out.as_slice(), &hex!("aa 03 00 00 00 01 02 03"));
    }

    #[test]
    fn sequence_writes_count_then_elements() {
        let mut out = OutputStream::new();
        let values = [7i16, -1];
        out.write_sequence::<ProtocolError, _>(values.len(), |out, i| {
            out.write_i16(values[i]);
            Ok(())
        })
        .unwrap();
        assert_eq!(out.as_slice(), &hex!("02 07 00 ff ff"));
    }

    #[test]
    fn overwrite_rejects_out_of_range() {
        let mut out = OutputStream::new();
        out.write_u8(0);
        assert!(out.overwrite(0, &[1, 2]).is_err());
    }
}
