//! Per-call type-id tables.
//!
//! The first time a string type id appears in a call it is written in full
//! and appended to the table; later slices of the same type name it by its
//! 1-based position. Types with a compact id bypass the table.

use std::collections::HashSet;

use slicewire_proto::{
    IndirectionTable, InputStream, Interned, OutputStream, SliceFlags, SliceHeader, TypeIdKind,
};

use crate::{
    descriptor::TypeId,
    error::{DecodeError, EncodeError},
    graph::SliceKey,
};

pub(super) struct TypeIdWriter {
    table: IndirectionTable<TypeId>,
    use_indices: bool,
}

impl TypeIdWriter {
    pub(super) fn new(use_indices: bool) -> Self {
        Self { table: IndirectionTable::new(), use_indices }
    }

    /// Write the slice header byte followed by the type key.
    pub(super) fn write_slice_start(
        &mut self,
        out: &mut OutputStream,
        key: &SliceKey,
        flags: SliceFlags,
    ) -> Result<(), EncodeError> {
        match key {
            SliceKey::Compact(id) => {
                out.write_u8(SliceHeader::new(TypeIdKind::Compact, flags).to_byte());
                out.write_size(*id as usize)?;
            },
            SliceKey::Name(type_id) => match self.table.intern(type_id.clone()) {
                Interned::Existing(index) if self.use_indices => {
                    out.write_u8(SliceHeader::new(TypeIdKind::Index, flags).to_byte());
                    out.write_size(index.get() as usize)?;
                },
                _ => {
                    out.write_u8(SliceHeader::new(TypeIdKind::String, flags).to_byte());
                    out.write_string(type_id.as_str())?;
                },
            },
        }
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct TypeIdReader {
    table: Vec<TypeId>,
    seen: HashSet<TypeId>,
}

impl TypeIdReader {
    pub(super) fn read_key(
        &mut self,
        input: &mut InputStream,
        kind: TypeIdKind,
    ) -> Result<SliceKey, DecodeError> {
        let offset = input.offset();
        match kind {
            TypeIdKind::String => {
                let type_id = TypeId::from(input.read_string()?);
                if self.seen.insert(type_id.clone()) {
                    self.table.push(type_id.clone());
                }
                Ok(SliceKey::Name(type_id))
            },
            TypeIdKind::Index => {
                let index = input.read_size()?;
                index
                    .checked_sub(1)
                    .and_then(|i| self.table.get(i))
                    .map(|type_id| SliceKey::Name(type_id.clone()))
                    .ok_or_else(|| {
                        DecodeError::corrupt(offset, format!("type-id index {index} not in table"))
                    })
            },
            TypeIdKind::Compact => {
                let id = input.read_size()?;
                let id = u32::try_from(id)
                    .map_err(|_| DecodeError::corrupt(offset, "compact id overflow"))?;
                Ok(SliceKey::Compact(id))
            },
        }
    }
}
