//! Graph to bytes.

use bytes::Bytes;
use slicewire_proto::{
    EncapsulationHeader, IndirectionTable, Interned, ObjectMarker, OutputStream, SliceFlags,
    flags::TERMINAL_MARKER,
};
use tracing::{debug, trace};

use super::{
    fields::{self, LocalTable},
    type_ids::TypeIdWriter,
};
use crate::{
    config::MarshalConfig,
    error::EncodeError,
    graph::{Graph, ObjectId, SliceKey},
    lifecycle::Dispatcher,
    registry::{SliceChain, TypeRegistry},
};

/// State of one encode call.
pub(super) struct Encoder<'a> {
    registry: &'a TypeRegistry,
    config: &'a MarshalConfig,
    out: OutputStream,
    handles: IndirectionTable<ObjectId>,
    type_ids: TypeIdWriter,
    lifecycle: Dispatcher,
}

impl<'a> Encoder<'a> {
    pub(super) fn new(registry: &'a TypeRegistry, config: &'a MarshalConfig) -> Self {
        Self {
            registry,
            config,
            out: OutputStream::with_capacity(256),
            handles: IndirectionTable::new(),
            type_ids: TypeIdWriter::new(config.compact_type_ids),
            lifecycle: Dispatcher::new(),
        }
    }

    pub(super) fn encode(
        mut self,
        graph: &mut Graph,
        roots: &[Option<ObjectId>],
    ) -> Result<Bytes, EncodeError> {
        debug!(roots = roots.len(), instances = graph.len(), "encoding graph");

        self.out.write_raw(&[0; EncapsulationHeader::SIZE]);
        self.out.write_size(roots.len())?;
        for &root in roots {
            self.encode_object(graph, root, 1)?;
        }

        let size = self.out.len();
        self.check_size()?;
        let header = EncapsulationHeader::new(size, self.config.encoding)?;
        self.out.overwrite(0, &header.to_bytes())?;

        debug!(objects = self.handles.len(), bytes = size, "encoded graph");
        Ok(self.out.freeze())
    }

    fn check_size(&self) -> Result<(), EncodeError> {
        let size = self.out.len();
        if size > self.config.max_message_size {
            return Err(EncodeError::MessageTooLarge { size, limit: self.config.max_message_size });
        }
        Ok(())
    }

    /// Null marker, a handle reference, or a first occurrence with every
    /// slice.
    fn encode_object(
        &mut self,
        graph: &mut Graph,
        object: Option<ObjectId>,
        depth: usize,
    ) -> Result<(), EncodeError> {
        let Some(id) = object else {
            self.out.write_u8(ObjectMarker::Null as u8);
            return Ok(());
        };
        if graph.get(id).is_none() {
            return Err(EncodeError::DanglingReference(id));
        }

        let handle = match self.handles.intern(id) {
            Interned::Existing(handle) => {
                self.out.write_u8(ObjectMarker::HandleRef as u8);
                self.out.write_size(handle.get() as usize)?;
                return Ok(());
            },
            Interned::New(handle) => handle,
        };
        if depth > self.config.max_depth {
            return Err(EncodeError::DepthExceeded { limit: self.config.max_depth });
        }
        trace!(%id, %handle, "assigned handle");

        let instance = graph.get_mut(id).ok_or(EncodeError::DanglingReference(id))?;
        self.lifecycle.pre_marshal(id, instance)?;

        self.out.write_u8(ObjectMarker::FirstOccurrence as u8);
        self.out.write_size(handle.get() as usize)?;
        self.write_slices(graph, id, depth)?;
        self.out.write_u8(TERMINAL_MARKER);
        self.check_size()?;

        self.lifecycle.slices_written(id)
    }

    /// Preserved slices first (they were more derived than anything this
    /// side knows), then the known chain from most-derived to root. Each
    /// slice's indirection table follows its payload.
    fn write_slices(
        &mut self,
        graph: &mut Graph,
        id: ObjectId,
        depth: usize,
    ) -> Result<(), EncodeError> {
        let instance = graph.get(id).ok_or(EncodeError::DanglingReference(id))?;
        let chain = instance.chain().cloned();
        let preserved = instance.preserved_slices().to_vec();

        match &chain {
            Some(chain) if !self.registry.contains(chain.type_id().as_str()) => {
                return Err(EncodeError::UnknownType(chain.type_id().clone()));
            },
            None if preserved.is_empty() => return Err(EncodeError::EmptyObject(id)),
            _ => {},
        }

        for slice in &preserved {
            let mut flags = SliceFlags::empty();
            flags.set(SliceFlags::HAS_OPTIONAL_MEMBERS, slice.has_optional_members());
            flags.set(SliceFlags::HAS_INDIRECTION_TABLE, !slice.references().is_empty());

            self.type_ids.write_slice_start(&mut self.out, slice.key(), flags)?;
            let slot = self.out.reserve_length();
            self.out.write_raw(slice.payload());
            self.out.patch_length(slot)?;
            self.write_table(graph, slice.references(), depth)?;
        }

        let Some(chain) = chain else {
            return Ok(());
        };
        for index in 0..chain.len() {
            let table = self.write_known_slice(graph, id, &chain, index)?;
            let entries: Vec<Option<ObjectId>> = table.into_iter().map(Some).collect();
            self.write_table(graph, &entries, depth)?;
        }
        Ok(())
    }

    fn write_known_slice(
        &mut self,
        graph: &Graph,
        id: ObjectId,
        chain: &SliceChain,
        index: usize,
    ) -> Result<Vec<ObjectId>, EncodeError> {
        let instance = graph.get(id).ok_or(EncodeError::DanglingReference(id))?;
        let (Some(layout), Some(values)) = (chain.layouts().get(index), instance.slice_values(index))
        else {
            return Err(EncodeError::EmptyObject(id));
        };
        fields::validate(layout, values)?;

        let descriptor = layout.descriptor();
        let key = match descriptor.compact() {
            Some(compact_id) => SliceKey::Compact(compact_id),
            None => SliceKey::Name(descriptor.type_id().clone()),
        };
        let table = LocalTable::collect(layout, values);
        let mut flags = SliceFlags::empty();
        flags.set(SliceFlags::HAS_OPTIONAL_MEMBERS, descriptor.has_optional_members());
        flags.set(SliceFlags::HAS_INDIRECTION_TABLE, !table.is_empty());

        self.type_ids.write_slice_start(&mut self.out, &key, flags)?;
        let slot = self.out.reserve_length();
        fields::write_slice(&mut self.out, layout, values, &table)?;
        self.out.patch_length(slot)?;

        Ok(table.into_entries())
    }

    fn write_table(
        &mut self,
        graph: &mut Graph,
        entries: &[Option<ObjectId>],
        depth: usize,
    ) -> Result<(), EncodeError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.out.write_size(entries.len())?;
        for &entry in entries {
            self.encode_object(graph, entry, depth + 1)?;
        }
        Ok(())
    }
}
