//! Error types for the registry, the slice codec and lifecycle dispatch.

use slicewire_proto::{Handle, ProtocolError};
use thiserror::Error;

use crate::{descriptor::TypeId, graph::ObjectId, lifecycle::LifecycleState};

/// Errors raised while building or freezing a type registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A type id was registered twice.
    #[error("type {0} is already registered")]
    DuplicateType(TypeId),

    /// Two types claim the same compact id.
    #[error("compact id {compact_id} is claimed by both {first} and {second}")]
    DuplicateCompactId {
        /// The contested compact id
        compact_id: u32,
        /// Type registered first
        first: TypeId,
        /// Type registered second
        second: TypeId,
    },

    /// Lookup of a type that is not registered.
    #[error("type {0} is not registered")]
    UnknownType(TypeId),

    /// Lookup of a compact id that no type carries.
    #[error("compact id {0} is not registered")]
    UnknownCompactId(u32),

    /// A type names a parent that is not registered.
    #[error("type {type_id} extends unregistered type {parent}")]
    UnknownParent {
        /// The derived type
        type_id: TypeId,
        /// The missing parent
        parent: TypeId,
    },

    /// The inheritance relation contains a cycle.
    #[error("inheritance cycle through {0}")]
    InheritanceCycle(TypeId),

    /// Two optional fields of one slice share a tag.
    #[error("tag {tag} is used twice in {type_id}")]
    DuplicateTag {
        /// The slice's type
        type_id: TypeId,
        /// The repeated tag
        tag: u32,
    },

    /// A field embeds a struct with no members, which occupies zero bytes
    /// on the wire.
    #[error("field {type_id}.{field} embeds memberless struct {name}")]
    EmptyStruct {
        /// Slice that declares the field
        type_id: TypeId,
        /// The field
        field: String,
        /// The struct
        name: String,
    },

    /// A factory could not fill in a new instance.
    #[error("factory failed: {0}")]
    Factory(#[source] FieldError),

    /// A schema document could not be read.
    #[error("invalid schema document: {0}")]
    Schema(String),
}

/// Errors raised when reading or writing an instance field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// No slice of the instance declares this field.
    #[error("{type_id} has no field {field}")]
    UnknownField {
        /// The instance's type
        type_id: TypeId,
        /// The requested field
        field: String,
    },

    /// The value does not match the field's wire kind.
    #[error("value for {type_id}.{field} does not match its declared kind")]
    KindMismatch {
        /// Slice that declares the field
        type_id: TypeId,
        /// The field
        field: String,
    },

    /// The instance has no known type and therefore no fields.
    #[error("opaque instance has no fields")]
    Opaque,
}

/// Failure reported by a lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    /// Hook failure with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Lifecycle state machine violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// A transition the state machine does not allow, including re-entry.
    #[error("object {object} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// The instance
        object: ObjectId,
        /// Current state
        from: LifecycleState,
        /// Requested state
        to: LifecycleState,
    },
}

/// Errors raised while encoding a graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    /// An instance's type is not registered with the encoder.
    #[error("cannot encode unregistered type {0}")]
    UnknownType(TypeId),

    /// An instance has no known type and no preserved slices to re-emit.
    #[error("object {0} is opaque and carries no slices")]
    EmptyObject(ObjectId),

    /// A pre-marshal hook failed; the output is discarded.
    #[error("pre-marshal hook of {type_id} failed: {source}")]
    HookFailure {
        /// The instance's type
        type_id: TypeId,
        /// What the hook reported
        #[source]
        source: HookError,
    },

    /// A reference names an object id that is not in the graph.
    #[error("reference to object {0} which is not in the graph")]
    DanglingReference(ObjectId),

    /// A field value does not match its descriptor.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// Object nesting exceeded the configured limit.
    #[error("object nesting deeper than {limit}")]
    DepthExceeded {
        /// Configured limit
        limit: usize,
    },

    /// The encoded message is larger than allowed.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Encoded size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Lifecycle state machine violation.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Wire-level write failure (size overflow).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors raised while decoding a graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The input ended before a required value was complete.
    #[error("truncated data at offset {offset}: needed {needed} more bytes")]
    TruncatedData {
        /// Where the incomplete read started
        offset: usize,
        /// Bytes the read required
        needed: usize,
    },

    /// The bytes do not form a valid encoding.
    #[error("corrupt framing at offset {offset}: {reason}")]
    CorruptFraming {
        /// Where the problem was detected
        offset: usize,
        /// What was wrong
        reason: String,
    },

    /// A reference was never resolved to a decoded object.
    #[error("reference to handle {handle} was never resolved")]
    UnresolvedReference {
        /// The handle that never resolved
        handle: Handle,
    },

    /// A root is not of (or derived from) the expected type.
    #[error("root {index}: expected {expected}, found {}", .found.as_ref().map_or("an opaque object", |t| t.as_str()))]
    UnknownRootType {
        /// Position of the root
        index: usize,
        /// The expected base type
        expected: TypeId,
        /// The decoded type, `None` for an opaque object
        found: Option<TypeId>,
    },

    /// A post-unmarshal hook failed; the decoded graph is discarded.
    #[error("post-unmarshal hook of {type_id} failed: {source}")]
    HookFailure {
        /// The instance's type
        type_id: TypeId,
        /// What the hook reported
        #[source]
        source: HookError,
    },

    /// The encapsulation uses an encoding version the decoder does not accept.
    #[error("unsupported encoding {major}.{minor}")]
    UnsupportedEncoding {
        /// Major version on the wire
        major: u8,
        /// Minor version on the wire
        minor: u8,
    },

    /// Object nesting exceeded the configured limit.
    #[error("object nesting deeper than {limit}")]
    DepthExceeded {
        /// Configured limit
        limit: usize,
    },

    /// The input is larger than allowed.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Input size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Lifecycle state machine violation.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl DecodeError {
    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        Self::CorruptFraming { offset, reason: reason.into() }
    }
}

impl From<ProtocolError> for DecodeError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Truncated { offset, needed, remaining } => {
                Self::TruncatedData { offset, needed: needed - remaining }
            },
            ProtocolError::Corrupt { offset, reason } => {
                Self::CorruptFraming { offset, reason: reason.into_owned() }
            },
            ProtocolError::SizeOverflow { size } => {
                Self::CorruptFraming { offset: 0, reason: format!("size {size} overflows") }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_maps_to_truncated_data() {
        let err = DecodeError::from(ProtocolError::Truncated { offset: 9, needed: 4, remaining: 1 });
        assert_eq!(err, DecodeError::TruncatedData { offset: 9, needed: 3 });
    }

    #[test]
    fn corrupt_maps_to_corrupt_framing() {
        let err = DecodeError::from(ProtocolError::corrupt(2, "bad"));
        assert!(matches!(err, DecodeError::CorruptFraming { offset: 2, .. }));
    }

    #[test]
    fn root_type_message_names_opaque_objects() {
        let err = DecodeError::UnknownRootType {
            index: 0,
            expected: TypeId::from("::Test::Base"),
            found: None,
        };
        assert_eq!(err.to_string(), "root 0: expected ::Test::Base, found an opaque object");
    }
}
