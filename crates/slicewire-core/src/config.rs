//! Marshalling configuration.

use serde::{Deserialize, Serialize};
use slicewire_proto::EncodingVersion;

/// What the decoder does with slices of unknown types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlicePolicy {
    /// Keep the raw bytes so a relay can re-encode them unchanged
    #[default]
    Preserve,
    /// Skip and discard them; for final consumers
    Drop,
}

/// Limits and options for one [`Marshaller`](crate::codec::Marshaller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarshalConfig {
    /// Encoding version written, and the only one accepted
    pub encoding: EncodingVersion,
    /// Handling of unknown slices on decode
    pub slice_policy: SlicePolicy,
    /// Write repeated type ids as indices into the per-call type-id table
    pub compact_type_ids: bool,
    /// Maximum object nesting depth on either side
    pub max_depth: usize,
    /// Maximum encoded message size in bytes
    pub max_message_size: usize,
}

impl MarshalConfig {
    /// Default nesting limit.
    pub const DEFAULT_MAX_DEPTH: usize = 100;

    /// Default message size limit (16 MiB).
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
}

impl Default for MarshalConfig {
    fn default() -> Self {
        Self {
            encoding: EncodingVersion::V1_0,
            slice_policy: SlicePolicy::Preserve,
            compact_type_ids: true,
            max_depth: Self::DEFAULT_MAX_DEPTH,
            max_message_size: Self::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}
