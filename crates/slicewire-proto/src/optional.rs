//! Tagged optional members.
//!
//! Optional fields follow a slice's required fields, in ascending tag order.
//! Each is prefixed with a tag header byte that carries the tag and a format,
//! so a receiver that does not know the tag can still skip the value:
//!
//! ```text
//! tag < 30:   [ tag << 3 | format ]
//! tag >= 30:  [ 30 << 3 | format ] [ size(tag) ]
//! end:        [ 0xFF ]
//! ```

use crate::{
    errors::{ProtocolError, Result},
    input::InputStream,
    output::OutputStream,
};

/// Byte closing the optional members of a slice.
pub const OPTIONAL_END_MARKER: u8 = 0xFF;

const INLINE_TAG_LIMIT: u32 = 30;

/// How an optional value is laid out, and therefore how to skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OptionalFormat {
    /// One byte
    F1 = 0,
    /// Two bytes
    F2 = 1,
    /// Four bytes
    F4 = 2,
    /// Eight bytes
    F8 = 3,
    /// A compact size
    Size = 4,
    /// Self-delimiting: a compact size then that many bytes
    VSize = 5,
    /// A u32 byte length then that many bytes
    FSize = 6,
    /// An object reference (indirection table index)
    Class = 7,
}

impl OptionalFormat {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Self::F1,
            1 => Self::F2,
            2 => Self::F4,
            3 => Self::F8,
            4 => Self::Size,
            5 => Self::VSize,
            6 => Self::FSize,
            _ => Self::Class,
        }
    }

    /// Skip one value of this format.
    pub fn skip(self, input: &mut InputStream) -> Result<()> {
        match self {
            Self::F1 => input.skip(1),
            Self::F2 => input.skip(2),
            Self::F4 => input.skip(4),
            Self::F8 => input.skip(8),
            Self::Size | Self::Class => input.read_size().map(|_| ()),
            Self::VSize => {
                let len = input.read_size()?;
                input.skip(len)
            },
            Self::FSize => {
                let len = input.read_u32()? as usize;
                input.skip(len)
            },
        }
    }
}

/// Decoded tag header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    /// Member tag
    pub tag: u32,
    /// Value format
    pub format: OptionalFormat,
}

impl TagHeader {
    /// Write the header.
    pub fn write(self, out: &mut OutputStream) -> Result<()> {
        if self.tag < INLINE_TAG_LIMIT {
            out.write_u8(((self.tag as u8) << 3) | self.format as u8);
            return Ok(());
        }

        out.write_u8(((INLINE_TAG_LIMIT as u8) << 3) | self.format as u8);
        out.write_size(self.tag as usize)
    }

    /// Read the next header, or `None` at the end marker.
    ///
    /// # Errors
    ///
    /// `Truncated` if the slice ends before the end marker; `Corrupt` if an
    /// escaped tag is smaller than the inline limit.
    pub fn read(input: &mut InputStream) -> Result<Option<Self>> {
        let offset = input.offset();
        let byte = input.read_u8()?;
        if byte == OPTIONAL_END_MARKER {
            return Ok(None);
        }

        let format = OptionalFormat::from_bits(byte);
        let inline = u32::from(byte >> 3);
        if inline < INLINE_TAG_LIMIT {
            return Ok(Some(Self { tag: inline, format }));
        }

        let tag = input.read_size()?;
        let tag = u32::try_from(tag).map_err(|_| ProtocolError::corrupt(offset, "tag overflow"))?;
        if tag < INLINE_TAG_LIMIT {
            return Err(ProtocolError::corrupt(offset, "escaped tag below inline limit"));
        }
        Ok(Some(Self { tag, format }))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn roundtrip(header: TagHeader) -> (Vec<u8>, TagHeader) {
        let mut out = OutputStream::new();
        header.write(&mut out).unwrap();
        let bytes = out.freeze();
        let mut input = InputStream::new(bytes.clone());
        let read = TagHeader::read(&mut input).unwrap().unwrap();
        (bytes.to_vec(), read)
    }

    #[test]
    fn inline_tag() {
        let header = TagHeader { tag: 3, format: OptionalFormat::F4 };
        let (bytes, read) = roundtrip(header);
        assert_eq!(bytes, vec![0x1a]);
        assert_eq!(read, header);
    }

    #[test]
    fn escaped_tag() {
        let header = TagHeader { tag: 300, format: OptionalFormat::VSize };
        let (bytes, read) = roundtrip(header);
        assert_eq!(bytes[0], 0xf5);
        assert_eq!(read, header);
    }

    #[test]
    fn end_marker() {
        let mut input = InputStream::new(Bytes::from_static(&[OPTIONAL_END_MARKER]));
        assert_eq!(TagHeader::read(&mut input).unwrap(), None);
    }

    #[test]
    fn skip_each_format() {
        let mut input = InputStream::new(Bytes::from_static(&[
            0xAA, // F1
            0x01, 0x02, // F2
            0x03, 0x01, 0x02, 0x03, // VSize
            0x02, 0x00, 0x00, 0x00, 0x09, 0x09, // FSize
            0x05, // Class
        ]));
        OptionalFormat::F1.skip(&mut input).unwrap();
        OptionalFormat::F2.skip(&mut input).unwrap();
        OptionalFormat::VSize.skip(&mut input).unwrap();
        OptionalFormat::FSize.skip(&mut input).unwrap();
        OptionalFormat::Class.skip(&mut input).unwrap();
        assert!(input.is_empty());
    }

    #[test]
    fn skip_past_end_is_truncation() {
        let mut input = InputStream::new(Bytes::from_static(&[0x01]));
        assert!(OptionalFormat::F8.skip(&mut input).unwrap_err().is_truncation());
    }
}
