//! Structural scanner for encoded messages.
//!
//! Walks a message without a registry: object markers, slice headers, type
//! keys, byte lengths and indirection tables. Payloads are skipped. Tests
//! use the result to count markers and to cut slices out of a message, the
//! way an older sender would have produced it.

use std::ops::Range;

use bytes::Bytes;
use slicewire_proto::{
    EncapsulationHeader, InputStream, ObjectMarker, ProtocolError, SliceFlags, SliceHeader,
    TypeIdKind,
};

/// Errors are the wire-level ones; the scanner has no schema to violate.
pub type ScanError = ProtocolError;

/// Type key as written, before any type-id table lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannedKey {
    /// String type id
    Name(String),
    /// 1-based index into the type-id table
    Index(usize),
    /// Compact id
    Compact(usize),
}

/// One slice inside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceFrame {
    /// Handle of the object the slice belongs to
    pub handle: usize,
    /// Position within the object's slice list, 0 = most derived
    pub position: usize,
    /// Type key
    pub key: ScannedKey,
    /// Header flags
    pub flags: SliceFlags,
    /// Offset of the header byte
    pub start: usize,
    /// Payload bytes
    pub payload: Range<usize>,
    /// Offset just past the slice's indirection table
    pub end: usize,
}

/// Everything found in one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    /// Number of roots
    pub roots: usize,
    /// Slices in wire order
    pub frames: Vec<SliceFrame>,
    /// `FirstOccurrence` markers
    pub first_occurrences: usize,
    /// `HandleRef` markers
    pub handle_refs: usize,
    /// Null object markers
    pub nulls: usize,
}

impl Scan {
    /// Slices of the object with `handle`, most derived first.
    pub fn slices_of(&self, handle: usize) -> Vec<&SliceFrame> {
        self.frames.iter().filter(|f| f.handle == handle).collect()
    }
}

/// Scan a whole message.
pub fn scan(bytes: &Bytes) -> Result<Scan, ScanError> {
    let mut input = InputStream::new(bytes.clone());
    input.skip(EncapsulationHeader::SIZE)?;

    let mut scan = Scan { roots: input.read_size()?, ..Scan::default() };
    for _ in 0..scan.roots {
        object(&mut input, &mut scan)?;
    }
    scan.frames.sort_by_key(|f| f.start);
    Ok(scan)
}

fn object(input: &mut InputStream, scan: &mut Scan) -> Result<(), ScanError> {
    let offset = input.offset();
    let byte = input.read_u8()?;
    match ObjectMarker::from_u8(byte) {
        Some(ObjectMarker::Null) => scan.nulls += 1,
        Some(ObjectMarker::HandleRef) => {
            input.read_size()?;
            scan.handle_refs += 1;
        },
        Some(ObjectMarker::FirstOccurrence) => {
            let handle = input.read_size()?;
            scan.first_occurrences += 1;
            slices(input, scan, handle)?;
        },
        None => return Err(ProtocolError::corrupt(offset, format!("object marker {byte:#04x}"))),
    }
    Ok(())
}

fn slices(input: &mut InputStream, scan: &mut Scan, handle: usize) -> Result<(), ScanError> {
    for position in 0.. {
        let start = input.offset();
        let Some(header) = SliceHeader::from_byte(input.read_u8()?, start)? else {
            break;
        };
        let key = match header.kind {
            TypeIdKind::String => ScannedKey::Name(input.read_string()?),
            TypeIdKind::Index => ScannedKey::Index(input.read_size()?),
            TypeIdKind::Compact => ScannedKey::Compact(input.read_size()?),
        };
        let length = input.read_u32()? as usize;
        let payload_start = input.offset();
        input.skip(length)?;
        let payload = payload_start..input.offset();

        if header.flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) {
            let count = input.read_size()?;
            for _ in 0..count {
                object(input, scan)?;
            }
        }

        let end = input.offset();
        scan.frames.push(SliceFrame { handle, position, key, flags: header.flags, start, payload, end });
    }
    Ok(())
}

/// Copy of `bytes` with the encapsulation size rewritten to `size`.
pub fn set_total_size(bytes: &[u8], size: usize) -> Bytes {
    let mut out = bytes.to_vec();
    if let (Some(prefix), Ok(size)) = (out.get_mut(..4), u32::try_from(size)) {
        prefix.copy_from_slice(&size.to_le_bytes());
    }
    Bytes::from(out)
}

/// Copy of `bytes` without `frame`, indirection table included, and with the
/// encapsulation size fixed up. Handles inside the removed table are not
/// renumbered.
pub fn strip_frame(bytes: &[u8], frame: &SliceFrame) -> Bytes {
    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(&bytes[..frame.start]);
    out.extend_from_slice(&bytes[frame.end..]);
    let len = out.len();
    set_total_size(&out, len)
}
