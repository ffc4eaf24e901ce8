//! Encapsulation header.
//!
//! Every encoded graph is wrapped in an encapsulation: a 6-byte header
//! followed by the body. The header records the total byte length (header
//! included) and the encoding version, so a receiver can reject a message
//! before touching the body.
//!
//! ```text
//! 0       4     5     6
//! ┌───────┬─────┬─────┬──────────────┐
//! │ size  │ maj │ min │ body ...     │
//! └───────┴─────┴─────┴──────────────┘
//!   u32 LE
//! ```

use serde::{Deserialize, Serialize};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::little_endian::U32,
};

use crate::errors::{ProtocolError, Result};

/// Encoding version of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodingVersion {
    /// Major version; incompatible changes
    pub major: u8,
    /// Minor version
    pub minor: u8,
}

impl EncodingVersion {
    /// Version 1.0, the only encoding currently defined.
    pub const V1_0: Self = Self { major: 1, minor: 0 };
}

impl Default for EncodingVersion {
    fn default() -> Self {
        Self::V1_0
    }
}

impl std::fmt::Display for EncodingVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Fixed 6-byte encapsulation header.
///
/// Layout is verified at compile time via `zerocopy`; parsing never copies
/// more than the six header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct EncapsulationHeader {
    size: U32,
    major: u8,
    minor: u8,
}

impl EncapsulationHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 6;

    /// Build a header for an encapsulation of `total_size` bytes.
    ///
    /// # Errors
    ///
    /// `SizeOverflow` if `total_size` does not fit in a u32.
    pub fn new(total_size: usize, version: EncodingVersion) -> Result<Self> {
        let size =
            u32::try_from(total_size).map_err(|_| ProtocolError::SizeOverflow { size: total_size })?;
        Ok(Self { size: U32::new(size), major: version.major, minor: version.minor })
    }

    /// Parse the header from the front of `bytes`.
    ///
    /// # Errors
    ///
    /// `Truncated` if fewer than [`Self::SIZE`] bytes are available.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match Self::read_from_prefix(bytes) {
            Ok((header, _)) => Ok(header),
            Err(_) => Err(ProtocolError::Truncated {
                offset: 0,
                needed: Self::SIZE,
                remaining: bytes.len(),
            }),
        }
    }

    /// Total encapsulation size, header included.
    pub fn total_size(&self) -> usize {
        self.size.get() as usize
    }

    /// Encoding version of the body.
    pub fn version(&self) -> EncodingVersion {
        EncodingVersion { major: self.major, minor: self.minor }
    }

    /// Header bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn header_layout() {
        let header = EncapsulationHeader::new(0x0102, EncodingVersion::V1_0).unwrap();
        assert_eq!(header.to_bytes(), hex!("02 01 00 00 01 00"));
    }

    #[test]
    fn parse_reads_prefix_only() {
        let bytes = hex!("0a 00 00 00 01 00 ff ff ff ff");
        let header = EncapsulationHeader::parse(&bytes).unwrap();
        assert_eq!(header.total_size(), 10);
        assert_eq!(header.version(), EncodingVersion::V1_0);
    }

    #[test]
    fn parse_short_buffer_is_truncation() {
        let result = EncapsulationHeader::parse(&[0x06, 0x00]);
        assert!(matches!(result, Err(ProtocolError::Truncated { needed: 6, remaining: 2, .. })));
    }
}
