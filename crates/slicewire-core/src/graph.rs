//! Instance arena.
//!
//! A [`Graph`] owns every instance of one object graph. Instances refer to
//! each other by [`ObjectId`], so sharing and cycles need no reference
//! counting. Dropping the graph ends every instance in it.

use std::{collections::HashSet, fmt};

use bytes::Bytes;

use crate::{
    descriptor::TypeId,
    error::FieldError,
    registry::SliceChain,
    value::Value,
};

/// Address of an instance within its [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Id of the instance at arena position `index`.
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Arena position.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// How a preserved slice named its type on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SliceKey {
    /// String type id
    Name(TypeId),
    /// Numeric compact id
    Compact(u32),
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(id) => write!(f, "{id}"),
            Self::Compact(id) => write!(f, "compact:{id}"),
        }
    }
}

/// A slice whose type the decoder did not know, kept so it can be written
/// back out unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct PreservedSlice {
    key: SliceKey,
    has_optional_members: bool,
    payload: Bytes,
    references: Vec<Option<ObjectId>>,
}

impl PreservedSlice {
    pub(crate) fn new(
        key: SliceKey,
        has_optional_members: bool,
        payload: Bytes,
        references: Vec<Option<ObjectId>>,
    ) -> Self {
        Self { key, has_optional_members, payload, references }
    }

    /// Type key as read from the wire.
    pub fn key(&self) -> &SliceKey {
        &self.key
    }

    /// True if the slice carried tagged optional members.
    pub fn has_optional_members(&self) -> bool {
        self.has_optional_members
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Instances named by the slice's indirection table, in table order.
    pub fn references(&self) -> &[Option<ObjectId>] {
        &self.references
    }
}

/// Where a decoded reference has to be written once its target is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    /// A field of a known slice; `path` walks into sequences and structs
    Field { slice: usize, field: usize, path: Vec<usize> },
    /// An entry of a preserved slice's reference table
    Preserved { slice: usize, entry: usize },
}

/// One node of an object graph.
///
/// A typed instance holds one value per field of each slice in its chain,
/// most-derived slice first. An opaque instance has no known type; it holds
/// only preserved slices.
#[derive(Debug, Clone)]
pub struct Instance {
    chain: Option<SliceChain>,
    values: Vec<Vec<Value>>,
    preserved: Vec<PreservedSlice>,
}

impl Instance {
    /// Instance of the chain's type with every field defaulted. Optional
    /// fields start absent.
    pub fn new(chain: SliceChain) -> Self {
        let values = chain
            .layouts()
            .iter()
            .map(|layout| {
                layout
                    .descriptor()
                    .fields()
                    .iter()
                    .map(|f| if f.is_optional() { Value::Absent } else { Value::default_for(&f.kind) })
                    .collect()
            })
            .collect();
        Self { chain: Some(chain), values, preserved: Vec::new() }
    }

    pub(crate) fn opaque(preserved: Vec<PreservedSlice>) -> Self {
        Self { chain: None, values: Vec::new(), preserved }
    }

    /// Most-derived known type, `None` for an opaque instance.
    pub fn type_id(&self) -> Option<&TypeId> {
        self.chain.as_ref().map(SliceChain::type_id)
    }

    /// The resolved slice chain, `None` for an opaque instance.
    pub fn chain(&self) -> Option<&SliceChain> {
        self.chain.as_ref()
    }

    /// True if no slice of this instance was known to the decoder.
    pub fn is_opaque(&self) -> bool {
        self.chain.is_none()
    }

    /// Field values of the slice at `slice` in chain order.
    pub fn slice_values(&self, slice: usize) -> Option<&[Value]> {
        self.values.get(slice).map(Vec::as_slice)
    }

    /// Unknown slices carried along for relay, most-derived first.
    pub fn preserved_slices(&self) -> &[PreservedSlice] {
        &self.preserved
    }

    /// Value of the field `name`, searching from the most-derived slice.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let (slice, field) = self.chain.as_ref()?.locate(name)?;
        self.values.get(slice)?.get(field)
    }

    /// Value of the field `name` declared by `type_id`, for fields that a
    /// derived type shadows.
    pub fn get_in(&self, type_id: &str, name: &str) -> Option<&Value> {
        let chain = self.chain.as_ref()?;
        let slice = chain.position(type_id)?;
        let field = chain.layouts().get(slice)?.descriptor().field_index(name)?;
        self.values.get(slice)?.get(field)
    }

    /// Replace the value of the field `name`.
    ///
    /// # Errors
    ///
    /// `UnknownField` if no slice declares it, `KindMismatch` if `value`
    /// does not fit the declared kind, `Opaque` for opaque instances.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), FieldError> {
        let chain = self.chain.as_ref().ok_or(FieldError::Opaque)?;
        let (slice, field) = chain.locate(name).ok_or_else(|| FieldError::UnknownField {
            type_id: chain.type_id().clone(),
            field: name.to_owned(),
        })?;
        self.set_at(slice, field, value.into())
    }

    /// Replace the value of the field `name` declared by `type_id`.
    pub fn set_in(
        &mut self,
        type_id: &str,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), FieldError> {
        let chain = self.chain.as_ref().ok_or(FieldError::Opaque)?;
        let unknown = || FieldError::UnknownField {
            type_id: chain.type_id().clone(),
            field: name.to_owned(),
        };
        let slice = chain.position(type_id).ok_or_else(unknown)?;
        let field = chain
            .layouts()
            .get(slice)
            .and_then(|layout| layout.descriptor().field_index(name))
            .ok_or_else(unknown)?;
        self.set_at(slice, field, value.into())
    }

    fn set_at(&mut self, slice: usize, field: usize, value: Value) -> Result<(), FieldError> {
        let chain = self.chain.as_ref().ok_or(FieldError::Opaque)?;
        let layout = chain.layouts().get(slice).ok_or(FieldError::Opaque)?;
        let descriptor = layout.descriptor();
        let Some(declared) = descriptor.fields().get(field) else {
            return Err(FieldError::UnknownField {
                type_id: descriptor.type_id().clone(),
                field: field.to_string(),
            });
        };
        if !value.conforms(&declared.kind, declared.is_optional()) {
            return Err(FieldError::KindMismatch {
                type_id: descriptor.type_id().clone(),
                field: declared.name.clone(),
            });
        }

        if let Some(slot) = self.values.get_mut(slice).and_then(|v| v.get_mut(field)) {
            *slot = value;
        }
        Ok(())
    }

    /// Every non-null reference held by this instance, in wire order.
    pub fn references(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        for preserved in &self.preserved {
            out.extend(preserved.references.iter().flatten());
        }
        for values in &self.values {
            for value in values {
                value.for_each_reference(&mut |id| out.push(id));
            }
        }
        out
    }

    pub(crate) fn set_preserved(&mut self, preserved: Vec<PreservedSlice>) {
        self.preserved = preserved;
    }

    pub(crate) fn values_mut(&mut self, slice: usize) -> Option<&mut Vec<Value>> {
        self.values.get_mut(slice)
    }

    /// Write `target` into `slot`. Returns false if the slot does not exist.
    pub(crate) fn patch(&mut self, slot: &Slot, target: ObjectId) -> bool {
        match slot {
            Slot::Field { slice, field, path } => {
                let Some(mut value) = self.values.get_mut(*slice).and_then(|v| v.get_mut(*field))
                else {
                    return false;
                };
                for &step in path {
                    let next = match value {
                        Value::Sequence(items) | Value::Struct(items) => items.get_mut(step),
                        _ => None,
                    };
                    let Some(next) = next else {
                        return false;
                    };
                    value = next;
                }
                *value = Value::Object(Some(target));
                true
            },
            Slot::Preserved { slice, entry } => {
                match self.preserved.get_mut(*slice).and_then(|p| p.references.get_mut(*entry)) {
                    Some(reference) => {
                        *reference = Some(target);
                        true
                    },
                    None => false,
                }
            },
        }
    }
}

/// Arena owning every instance of one object graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    instances: Vec<Instance>,
}

impl Graph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move an instance into the graph.
    pub fn insert(&mut self, instance: Instance) -> ObjectId {
        let id = ObjectId(self.instances.len() as u32);
        self.instances.push(instance);
        id
    }

    /// Instance at `id`.
    pub fn get(&self, id: ObjectId) -> Option<&Instance> {
        self.instances.get(id.index())
    }

    /// Mutable instance at `id`.
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Instance> {
        self.instances.get_mut(id.index())
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// True if the graph holds no instances.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// All instances with their ids, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &Instance)> {
        self.instances.iter().enumerate().map(|(i, inst)| (ObjectId(i as u32), inst))
    }

    /// Instances reachable from `roots`, in depth-first pre-order. Ids not in
    /// the graph are skipped.
    pub fn reachable(&self, roots: &[Option<ObjectId>]) -> Vec<ObjectId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<ObjectId> = roots.iter().rev().flatten().copied().collect();

        while let Some(id) = stack.pop() {
            let Some(instance) = self.get(id) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            stack.extend(instance.references().into_iter().rev());
        }
        order
    }
}
