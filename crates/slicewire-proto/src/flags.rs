//! Slice header byte and object markers.
//!
//! A slice header is one byte. The low two bits say how the slice's type key
//! is written, the remaining bits are [`SliceFlags`]:
//!
//! ```text
//!  7   6   5   4   3   2   1   0
//! ┌───┬───┬───┬───┬───┬───┬───────┐
//! │ 0 │ 0 │ 0 │ S │ I │ O │ kind  │
//! └───┴───┴───┴───┴───┴───┴───────┘
//!   S = HAS_SLICE_SIZE, I = HAS_INDIRECTION_TABLE, O = HAS_OPTIONAL_MEMBERS
//! ```
//!
//! A header byte of `0x00` is the terminal marker that closes an object's
//! slice list.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

bitflags! {
    /// Per-slice flags carried in the upper bits of the header byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SliceFlags: u8 {
        /// Tagged optional members follow the required fields, closed by the
        /// end marker
        const HAS_OPTIONAL_MEMBERS = 0x04;
        /// An indirection table follows the payload
        const HAS_INDIRECTION_TABLE = 0x08;
        /// A u32 byte length precedes the payload (always set)
        const HAS_SLICE_SIZE = 0x10;
    }
}

/// How a slice names its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeIdKind {
    /// Full string type id; appended to the per-call type-id table
    String = 1,
    /// 1-based index into the per-call type-id table
    Index = 2,
    /// Numeric compact id declared by the schema
    Compact = 3,
}

const KIND_MASK: u8 = 0x03;

/// Value of the header byte that terminates a slice list.
pub const TERMINAL_MARKER: u8 = 0x00;

/// Decoded slice header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceHeader {
    /// How the type key is written
    pub kind: TypeIdKind,
    /// Slice flags
    pub flags: SliceFlags,
}

impl SliceHeader {
    /// Header for a slice; `HAS_SLICE_SIZE` is always added.
    pub fn new(kind: TypeIdKind, flags: SliceFlags) -> Self {
        Self { kind, flags: flags | SliceFlags::HAS_SLICE_SIZE }
    }

    /// Encode to the header byte.
    pub fn to_byte(self) -> u8 {
        self.kind as u8 | self.flags.bits()
    }

    /// Parse a header byte. Returns `Ok(None)` for the terminal marker.
    ///
    /// # Errors
    ///
    /// `Corrupt` if unknown bits are set, the type-id kind is zero, or the
    /// slice-size flag is missing.
    pub fn from_byte(byte: u8, offset: usize) -> Result<Option<Self>> {
        if byte == TERMINAL_MARKER {
            return Ok(None);
        }

        let kind = match byte & KIND_MASK {
            1 => TypeIdKind::String,
            2 => TypeIdKind::Index,
            3 => TypeIdKind::Compact,
            _ => return Err(ProtocolError::corrupt(offset, "slice header without a type-id kind")),
        };

        let Some(flags) = SliceFlags::from_bits(byte & !KIND_MASK) else {
            return Err(ProtocolError::corrupt(offset, format!("unknown slice flags {byte:#04x}")));
        };

        if !flags.contains(SliceFlags::HAS_SLICE_SIZE) {
            return Err(ProtocolError::corrupt(offset, "slice is missing its byte length"));
        }

        Ok(Some(Self { kind, flags }))
    }
}

/// Leading byte of an object encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectMarker {
    /// No object
    Null = 0,
    /// Reference to an object already written in this call
    HandleRef = 1,
    /// First occurrence: handle then the slice list
    FirstOccurrence = 2,
}

impl ObjectMarker {
    /// Convert from the raw byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Null),
            1 => Some(Self::HandleRef),
            2 => Some(Self::FirstOccurrence),
            _ => None,
        }
    }
}
