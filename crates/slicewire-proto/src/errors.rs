//! Protocol error types.

use std::borrow::Cow;

use thiserror::Error;

/// Result alias for wire-level operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while reading or writing the wire grammar.
///
/// Offsets are absolute positions within the buffer handed to the outermost
/// [`crate::InputStream`], including for sub-streams split off for slice
/// payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The buffer ended before a complete value could be read.
    #[error("truncated at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Where the read started
        offset: usize,
        /// Bytes the read required
        needed: usize,
        /// Bytes actually left
        remaining: usize,
    },

    /// The bytes are present but do not form a valid encoding.
    #[error("corrupt framing at offset {offset}: {reason}")]
    Corrupt {
        /// Where the bad byte sequence starts
        offset: usize,
        /// What was wrong
        reason: Cow<'static, str>,
    },

    /// A size or length does not fit the encodable range (i32 for sizes, u32
    /// for slice lengths).
    #[error("size {size} exceeds the encodable range")]
    SizeOverflow {
        /// The offending size
        size: usize,
    },
}

impl ProtocolError {
    /// Build a [`ProtocolError::Corrupt`].
    pub fn corrupt(offset: usize, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Corrupt { offset, reason: reason.into() }
    }

    /// True if this error means the input simply ran out.
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}
