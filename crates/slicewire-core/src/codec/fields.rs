//! Field values inside a slice payload.
//!
//! Object references in a payload are 1-based indices into the slice's own
//! indirection table, `0` for null. The writer collects that table before the
//! payload so the header flags are known up front; the reader records each
//! index it meets so the caller can fill the references in once the table
//! following the payload has been decoded.

use std::collections::HashMap;

use slicewire_proto::{
    InputStream, OptionalFormat, OutputStream, TagHeader, optional::OPTIONAL_END_MARKER,
};

use crate::{
    descriptor::{FieldDescriptor, TypeId, WireKind},
    error::{DecodeError, EncodeError, FieldError},
    graph::ObjectId,
    registry::SliceLayout,
    value::Value,
};

/// Skip format used for an optional field of this kind.
pub(super) fn optional_format(kind: &WireKind) -> OptionalFormat {
    match kind {
        WireKind::Bool | WireKind::Byte => OptionalFormat::F1,
        WireKind::Short => OptionalFormat::F2,
        WireKind::Int | WireKind::Float => OptionalFormat::F4,
        WireKind::Long | WireKind::Double => OptionalFormat::F8,
        WireKind::String => OptionalFormat::VSize,
        WireKind::Sequence(_) | WireKind::Struct(_) => OptionalFormat::FSize,
        WireKind::Object => OptionalFormat::Class,
    }
}

/// Distinct non-null references of one slice, in first-use order.
#[derive(Debug, Default)]
pub(super) struct LocalTable {
    entries: Vec<ObjectId>,
    index: HashMap<ObjectId, usize>,
}

impl LocalTable {
    /// Walk `values` in wire order and intern every reference.
    pub(super) fn collect(layout: &SliceLayout, values: &[Value]) -> Self {
        let mut table = Self::default();
        let order = layout.required().iter().chain(layout.optional());
        for value in order.filter_map(|&i| values.get(i)) {
            value.for_each_reference(&mut |id| {
                table.intern(id);
            });
        }
        table
    }

    fn intern(&mut self, id: ObjectId) -> usize {
        let next = self.entries.len() + 1;
        *self.index.entry(id).or_insert_with(|| {
            self.entries.push(id);
            next
        })
    }

    fn position(&self, id: ObjectId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(super) fn into_entries(self) -> Vec<ObjectId> {
        self.entries
    }
}

/// Check every value of a slice against its descriptor.
pub(super) fn validate(layout: &SliceLayout, values: &[Value]) -> Result<(), FieldError> {
    let descriptor = layout.descriptor();
    for (index, field) in descriptor.fields().iter().enumerate() {
        let conforms =
            values.get(index).is_some_and(|v| v.conforms(&field.kind, field.is_optional()));
        if !conforms {
            return Err(mismatch(descriptor.type_id(), field));
        }
    }
    Ok(())
}

fn mismatch(type_id: &TypeId, field: &FieldDescriptor) -> FieldError {
    FieldError::KindMismatch { type_id: type_id.clone(), field: field.name.clone() }
}

/// Write the payload of a known slice: required fields, then present
/// optionals and the end marker if the slice declares any.
pub(super) fn write_slice(
    out: &mut OutputStream,
    layout: &SliceLayout,
    values: &[Value],
    table: &LocalTable,
) -> Result<(), EncodeError> {
    let descriptor = layout.descriptor();
    for &index in layout.required() {
        let (field, value) = field_value(layout, values, index)?;
        write_value(out, &field.kind, value, table)
            .map_err(|e| e.unwrap_or_else(|| mismatch(descriptor.type_id(), field).into()))?;
    }

    if !descriptor.has_optional_members() {
        return Ok(());
    }

    for &index in layout.optional() {
        let (field, value) = field_value(layout, values, index)?;
        let Some(tag) = field.tag else { continue };
        if value.is_absent() {
            continue;
        }

        let format = optional_format(&field.kind);
        TagHeader { tag, format }.write(out)?;
        let written = if format == OptionalFormat::FSize {
            let slot = out.reserve_length();
            let written = write_value(out, &field.kind, value, table);
            out.patch_length(slot)?;
            written
        } else {
            write_value(out, &field.kind, value, table)
        };
        written.map_err(|e| e.unwrap_or_else(|| mismatch(descriptor.type_id(), field).into()))?;
    }
    out.write_u8(OPTIONAL_END_MARKER);
    Ok(())
}

fn field_value<'a>(
    layout: &'a SliceLayout,
    values: &'a [Value],
    index: usize,
) -> Result<(&'a FieldDescriptor, &'a Value), EncodeError> {
    let descriptor = layout.descriptor();
    match (descriptor.fields().get(index), values.get(index)) {
        (Some(field), Some(value)) => Ok((field, value)),
        (Some(field), None) => Err(mismatch(descriptor.type_id(), field).into()),
        _ => Err(FieldError::UnknownField {
            type_id: descriptor.type_id().clone(),
            field: index.to_string(),
        }
        .into()),
    }
}

/// `Err(None)` is a value that does not fit its kind; the caller names the
/// field.
fn write_value(
    out: &mut OutputStream,
    kind: &WireKind,
    value: &Value,
    table: &LocalTable,
) -> Result<(), Option<EncodeError>> {
    let wire = |e: slicewire_proto::ProtocolError| Some(EncodeError::from(e));
    match (kind, value) {
        (WireKind::Bool, Value::Bool(v)) => out.write_bool(*v),
        (WireKind::Byte, Value::Byte(v)) => out.write_u8(*v),
        (WireKind::Short, Value::Short(v)) => out.write_i16(*v),
        (WireKind::Int, Value::Int(v)) => out.write_i32(*v),
        (WireKind::Long, Value::Long(v)) => out.write_i64(*v),
        (WireKind::Float, Value::Float(v)) => out.write_f32(*v),
        (WireKind::Double, Value::Double(v)) => out.write_f64(*v),
        (WireKind::String, Value::String(v)) => out.write_string(v).map_err(wire)?,
        (WireKind::Sequence(element), Value::Sequence(items)) => {
            out.write_size(items.len()).map_err(wire)?;
            for item in items {
                write_value(out, element, item, table)?;
            }
        },
        (WireKind::Struct(layout), Value::Struct(members))
            if members.len() == layout.members.len() =>
        {
            for (member, value) in layout.members.iter().zip(members) {
                write_value(out, &member.kind, value, table)?;
            }
        },
        (WireKind::Object, Value::Object(None)) => out.write_size(0).map_err(wire)?,
        (WireKind::Object, Value::Object(Some(id))) => {
            let position =
                table.position(*id).ok_or(Some(EncodeError::DanglingReference(*id)))?;
            out.write_size(position).map_err(wire)?;
        },
        _ => return Err(None),
    }
    Ok(())
}

/// A payload reference waiting for the slice's indirection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct TableRef {
    /// Field index within the slice
    pub(super) field: usize,
    /// Steps into sequences and structs
    pub(super) path: Vec<usize>,
    /// 1-based table entry
    pub(super) entry: usize,
}

/// Read the payload of a known slice. Reference fields come back null and
/// are listed in the returned [`TableRef`]s.
pub(super) fn read_slice(
    input: &mut InputStream,
    layout: &SliceLayout,
    has_optional_members: bool,
) -> Result<(Vec<Value>, Vec<TableRef>), DecodeError> {
    let fields = layout.descriptor().fields();
    let mut values = vec![Value::Absent; fields.len()];
    let mut refs = Vec::new();
    let mut path = Vec::new();

    for &index in layout.required() {
        let Some(field) = fields.get(index) else { continue };
        let mut reader = ValueReader { field: index, path: &mut path, refs: &mut refs };
        values[index] = reader.read(input, &field.kind)?;
    }

    if !has_optional_members {
        return Ok((values, refs));
    }

    loop {
        let offset = input.offset();
        let Some(header) = TagHeader::read(input)? else { break };
        let known = layout
            .optional()
            .iter()
            .copied()
            .find(|&i| fields.get(i).and_then(|f| f.tag) == Some(header.tag));
        let Some(index) = known else {
            header.format.skip(input)?;
            continue;
        };
        let Some(field) = fields.get(index) else { continue };
        if header.format != optional_format(&field.kind) {
            return Err(DecodeError::corrupt(
                offset,
                format!("optional tag {} has format {:?}", header.tag, header.format),
            ));
        }

        let mut reader = ValueReader { field: index, path: &mut path, refs: &mut refs };
        values[index] = if header.format == OptionalFormat::FSize {
            let len = input.read_u32()? as usize;
            let mut nested = input.split(len)?;
            let value = reader.read(&mut nested, &field.kind)?;
            if !nested.is_empty() {
                return Err(DecodeError::corrupt(
                    nested.offset(),
                    "optional value shorter than its length",
                ));
            }
            value
        } else {
            reader.read(input, &field.kind)?
        };
    }

    Ok((values, refs))
}

struct ValueReader<'a> {
    field: usize,
    path: &'a mut Vec<usize>,
    refs: &'a mut Vec<TableRef>,
}

impl ValueReader<'_> {
    fn read(&mut self, input: &mut InputStream, kind: &WireKind) -> Result<Value, DecodeError> {
        let value = match kind {
            WireKind::Bool => Value::Bool(input.read_bool()?),
            WireKind::Byte => Value::Byte(input.read_u8()?),
            WireKind::Short => Value::Short(input.read_i16()?),
            WireKind::Int => Value::Int(input.read_i32()?),
            WireKind::Long => Value::Long(input.read_i64()?),
            WireKind::Float => Value::Float(input.read_f32()?),
            WireKind::Double => Value::Double(input.read_f64()?),
            WireKind::String => Value::String(input.read_string()?),
            WireKind::Sequence(element) => {
                let count = input.read_size()?;
                input.check_sequence(count, element.min_wire_size())?;
                let mut items = Vec::with_capacity(count.min(input.remaining()));
                for i in 0..count {
                    self.path.push(i);
                    let item = self.read(input, element);
                    self.path.pop();
                    items.push(item?);
                }
                Value::Sequence(items)
            },
            WireKind::Struct(layout) => {
                let mut members = Vec::with_capacity(layout.members.len());
                for (i, member) in layout.members.iter().enumerate() {
                    self.path.push(i);
                    let value = self.read(input, &member.kind);
                    self.path.pop();
                    members.push(value?);
                }
                Value::Struct(members)
            },
            WireKind::Object => {
                let entry = input.read_size()?;
                if entry != 0 {
                    self.refs.push(TableRef { field: self.field, path: self.path.clone(), entry });
                }
                Value::Object(None)
            },
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use hex_literal::hex;

    use super::*;
    use crate::{
        descriptor::{StructDescriptor, TypeDescriptor},
        registry::{RegistryBuilder, TypeRegistry},
    };

    fn registry() -> TypeRegistry {
        let pair = StructDescriptor::new("Pair")
            .member("left", WireKind::Object)
            .member("right", WireKind::Object);
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                TypeDescriptor::new("::T")
                    .field(FieldDescriptor::required("count", WireKind::Short))
                    .field(FieldDescriptor::required("pair", WireKind::Struct(pair)))
                    .field(FieldDescriptor::optional(
                        "tags",
                        WireKind::sequence(WireKind::String),
                        2,
                    ))
                    .field(FieldDescriptor::optional("flag", WireKind::Bool, 1)),
            )
            .unwrap();
        builder.freeze().unwrap()
    }

    fn layout(registry: &TypeRegistry) -> &SliceLayout {
        &registry.resolve_slice_chain("::T").unwrap().layouts()[0]
    }

    #[test]
    fn payload_layout() {
        let registry = registry();
        let layout = layout(&registry);
        let a = ObjectId::from_index(5);
        let b = ObjectId::from_index(2);
        let values = vec![
            Value::Short(-2),
            Value::Struct(vec![Value::Object(Some(a)), Value::Object(Some(b))]),
            Value::Sequence(vec![Value::from("x")]),
            Value::Absent,
        ];

        let table = LocalTable::collect(layout, &values);
        let mut out = OutputStream::new();
        write_slice(&mut out, layout, &values, &table).unwrap();

        // count, pair (entries 1 and 2), tag 2 FSize with 3-byte body, end
        assert_eq!(out.as_slice(), hex!("feff 01 02 16 03000000 01 01 78 ff"));
        assert_eq!(table.into_entries(), vec![a, b]);
    }

    #[test]
    fn reader_records_table_refs_and_skips_unknown_tags() {
        let registry = registry();
        let layout = layout(&registry);
        // count, pair (null, entry 1), unknown tag 7 F4, tag 1 bool, end
        let bytes = hex!("0100 00 01 3a 01020304 08 01 ff");
        let mut input = InputStream::new(Bytes::copy_from_slice(&bytes));

        let (values, refs) = read_slice(&mut input, layout, true).unwrap();
        assert!(input.is_empty());
        assert_eq!(values[0], Value::Short(1));
        assert_eq!(values[2], Value::Absent);
        assert_eq!(values[3], Value::Bool(true));
        assert_eq!(refs, vec![TableRef { field: 1, path: vec![1], entry: 1 }]);
    }

    #[test]
    fn huge_sequence_count_fails_before_allocating() {
        let registry = registry();
        let layout = layout(&registry);
        // tags: FSize body of 5 bytes claiming 0x7fffffff strings
        let bytes = hex!("0100 00 00 16 05000000 ff ffffff7f ff");
        let mut input = InputStream::new(Bytes::copy_from_slice(&bytes));
        let err = read_slice(&mut input, layout, true).unwrap_err();
        assert!(matches!(err, DecodeError::TruncatedData { offset: 14, .. }), "{err:?}");
    }

    #[test]
    fn known_tag_with_wrong_format_is_corrupt() {
        let registry = registry();
        let layout = layout(&registry);
        // tag 1 declared bool (F1) but written as F4
        let mut input = InputStream::new(Bytes::copy_from_slice(&hex!("0100 00 00 0a 01000000 ff")));
        let err = read_slice(&mut input, layout, true).unwrap_err();
        assert!(matches!(err, DecodeError::CorruptFraming { offset: 4, .. }));
    }

    #[test]
    fn value_of_wrong_kind_names_the_field() {
        let registry = registry();
        let layout = layout(&registry);
        let pair = Value::default_for(&layout.descriptor().fields()[1].kind);
        let values = vec![Value::Int(1), pair, Value::Absent, Value::Absent];

        let err = validate(layout, &values).unwrap_err();
        assert_eq!(err, FieldError::KindMismatch {
            type_id: TypeId::from("::T"),
            field: "count".into(),
        });
    }
}
