//! Wire format primitives for slicewire.
//!
//! An encoded message is an encapsulation: a fixed 6-byte header (zero-copy
//! binary) followed by the encoded object graph. Objects are written as a
//! sequence of slices, one per inheritance level, most-derived first. Each
//! slice carries its own byte length so a receiver that does not know the type
//! can step over it and land on the next slice boundary.
//!
//! This crate knows nothing about types or schemas. It provides the byte-level
//! grammar: the append-only [`OutputStream`], the mirroring [`InputStream`],
//! slice headers, object markers, tagged optional members, and the identity
//! tables that give every distinct object a small integer handle.
//!
//! # Security
//!
//! Every read is bounds-checked and returns [`ProtocolError`] instead of
//! panicking. Slice payloads are decoded from bounded sub-streams so a lying
//! length cannot make the reader run into neighbouring data.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod encapsulation;
pub mod errors;
pub mod flags;
pub mod indirection;
pub mod input;
pub mod optional;
pub mod output;

pub use encapsulation::{EncapsulationHeader, EncodingVersion};
pub use errors::{ProtocolError, Result};
pub use flags::{ObjectMarker, SliceFlags, SliceHeader, TypeIdKind};
pub use indirection::{Handle, IndirectionTable, Interned, PatchTable};
pub use input::InputStream;
pub use optional::{OptionalFormat, TagHeader};
pub use output::OutputStream;
