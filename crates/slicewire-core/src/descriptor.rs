//! Static schema information: types, slices and fields.
//!
//! Descriptors are built once, registered with a
//! [`RegistryBuilder`](crate::registry::RegistryBuilder), and never mutated
//! afterwards. Each [`TypeDescriptor`] declares exactly one inheritance level
//! (one slice); the full chain is resolved by the registry.

use std::{borrow::Borrow, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{lifecycle::Lifecycle, registry::InstanceFactory};

/// Stable string identifier of a type, e.g. `::Demo::Shape`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TypeId(Arc<str>);

impl TypeId {
    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for TypeId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<TypeId> for String {
    fn from(id: TypeId) -> Self {
        id.0.as_ref().to_owned()
    }
}

impl Borrow<str> for TypeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// How a field is laid out on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireKind {
    /// One byte, `0` or `1`
    Bool,
    /// One unsigned byte
    Byte,
    /// i16
    Short,
    /// i32
    Int,
    /// i64
    Long,
    /// f32
    Float,
    /// f64
    Double,
    /// Size-prefixed UTF-8
    String,
    /// Size-prefixed sequence of one element kind
    Sequence(Box<WireKind>),
    /// Nullable reference to another instance in the graph
    Object,
    /// Value type embedded inline, members in declaration order
    Struct(StructDescriptor),
}

impl WireKind {
    /// Sequence of `element`.
    pub fn sequence(element: Self) -> Self {
        Self::Sequence(Box::new(element))
    }

    /// Smallest number of bytes one value of this kind can occupy.
    pub fn min_wire_size(&self) -> usize {
        match self {
            Self::Bool | Self::Byte | Self::String | Self::Sequence(_) | Self::Object => 1,
            Self::Short => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
            Self::Struct(s) => s.members.iter().map(|m| m.kind.min_wire_size()).sum(),
        }
    }

    /// First struct without members anywhere inside this kind.
    pub fn find_empty_struct(&self) -> Option<&StructDescriptor> {
        match self {
            Self::Sequence(element) => element.find_empty_struct(),
            Self::Struct(s) if s.members.is_empty() => Some(s),
            Self::Struct(s) => s.members.iter().find_map(|m| m.kind.find_empty_struct()),
            _ => None,
        }
    }
}

/// Embedded struct layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDescriptor {
    /// Struct name, for diagnostics
    pub name: String,
    /// Members in wire order
    pub members: Vec<MemberDescriptor>,
}

impl StructDescriptor {
    /// Struct with no members yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), members: Vec::new() }
    }

    /// Append a member.
    #[must_use]
    pub fn member(mut self, name: impl Into<String>, kind: WireKind) -> Self {
        self.members.push(MemberDescriptor { name: name.into(), kind });
        self
    }
}

/// One member of an embedded struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    /// Member name
    pub name: String,
    /// Member kind
    pub kind: WireKind,
}

/// One data member of a slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name, unique within its slice
    pub name: String,
    /// Wire layout
    pub kind: WireKind,
    /// Tag of an optional field; `None` for required fields
    #[serde(default)]
    pub tag: Option<u32>,
}

impl FieldDescriptor {
    /// A required field, written in declaration order.
    pub fn required(name: impl Into<String>, kind: WireKind) -> Self {
        Self { name: name.into(), kind, tag: None }
    }

    /// An optional field, written after the required ones under `tag`.
    pub fn optional(name: impl Into<String>, kind: WireKind, tag: u32) -> Self {
        Self { name: name.into(), kind, tag: Some(tag) }
    }

    /// True for tagged optional fields.
    pub fn is_optional(&self) -> bool {
        self.tag.is_some()
    }
}

/// Declaration of one type: its own slice plus where it sits in the
/// inheritance relation.
#[derive(Clone)]
pub struct TypeDescriptor {
    type_id: TypeId,
    parent: Option<TypeId>,
    compact_id: Option<u32>,
    fields: Vec<FieldDescriptor>,
    factory: Option<Arc<dyn InstanceFactory>>,
    lifecycle: Option<Arc<dyn Lifecycle>>,
}

impl TypeDescriptor {
    /// Root type with no fields.
    pub fn new(type_id: impl Into<TypeId>) -> Self {
        Self {
            type_id: type_id.into(),
            parent: None,
            compact_id: None,
            fields: Vec::new(),
            factory: None,
            lifecycle: None,
        }
    }

    /// Declare the parent type.
    #[must_use]
    pub fn extends(mut self, parent: impl Into<TypeId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Assign a numeric compact id, written instead of the string id.
    #[must_use]
    pub fn compact_id(mut self, id: u32) -> Self {
        self.compact_id = Some(id);
        self
    }

    /// Append a field to this type's slice.
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Construct instances with a custom factory instead of the default one.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn InstanceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Attach lifecycle hooks. Derived types without hooks of their own
    /// inherit these.
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn Lifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// The type id.
    pub fn type_id(&self) -> &TypeId {
        &self.type_id
    }

    /// The declared parent, if any.
    pub fn parent(&self) -> Option<&TypeId> {
        self.parent.as_ref()
    }

    /// The compact id, if any.
    pub fn compact(&self) -> Option<u32> {
        self.compact_id
    }

    /// Fields of this slice in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// True if the slice declares any optional field.
    pub fn has_optional_members(&self) -> bool {
        self.fields.iter().any(FieldDescriptor::is_optional)
    }

    /// Position of the field called `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub(crate) fn factory(&self) -> Option<&Arc<dyn InstanceFactory>> {
        self.factory.as_ref()
    }

    pub(crate) fn lifecycle(&self) -> Option<&Arc<dyn Lifecycle>> {
        self.lifecycle.as_ref()
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_id", &self.type_id)
            .field("parent", &self.parent)
            .field("compact_id", &self.compact_id)
            .field("fields", &self.fields)
            .field("factory", &self.factory.is_some())
            .field("lifecycle", &self.lifecycle.is_some())
            .finish()
    }
}
