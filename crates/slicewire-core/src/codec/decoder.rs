//! Bytes to graph.
//!
//! Each object is assembled in a [`Frame`] while its slices are read and
//! moves into the arena when its terminal marker is reached. A reference to
//! an object that is still being assembled (an ancestor, or the object
//! itself) cannot be filled in yet; it is recorded in the [`PatchTable`]
//! under the target's handle and applied when the target lands in the arena.

use std::collections::HashMap;

use bytes::Bytes;
use slicewire_proto::{
    EncapsulationHeader, Handle, InputStream, ObjectMarker, PatchTable, SliceFlags, SliceHeader,
};
use tracing::{debug, trace};

use super::{Decoded, fields, type_ids::TypeIdReader};
use crate::{
    config::{MarshalConfig, SlicePolicy},
    descriptor::TypeId,
    error::DecodeError,
    graph::{Graph, Instance, ObjectId, PreservedSlice, SliceKey, Slot},
    lifecycle::Dispatcher,
    registry::{SliceChain, TypeRegistry},
};

/// Outcome of reading one object encoding.
#[derive(Debug, Clone, Copy)]
enum Resolved {
    /// Null, or an object already in the arena
    Ready(Option<ObjectId>),
    /// A handle whose object is not in the arena yet
    Pending(Handle),
}

/// Something waiting for a handle to resolve.
#[derive(Debug)]
enum PatchSite {
    Field { owner: ObjectId, slot: Slot },
    Root(usize),
}

/// An object whose slices are still being read.
#[derive(Default)]
struct Frame {
    instance: Option<Instance>,
    position: usize,
    /// Slices seen so far, dropped ones included
    read: usize,
    preserved: Vec<PreservedSlice>,
    deferred: Vec<(Slot, Handle)>,
}

/// State of one decode call.
pub(super) struct Decoder<'a> {
    registry: &'a TypeRegistry,
    config: &'a MarshalConfig,
    graph: Graph,
    roots: Vec<Option<ObjectId>>,
    /// Arena id per handle, `None` while the object is being assembled
    bound: Vec<Option<ObjectId>>,
    patches: PatchTable<PatchSite>,
    outstanding: HashMap<ObjectId, usize>,
    type_ids: TypeIdReader,
    lifecycle: Dispatcher,
}

impl<'a> Decoder<'a> {
    pub(super) fn new(registry: &'a TypeRegistry, config: &'a MarshalConfig) -> Self {
        Self {
            registry,
            config,
            graph: Graph::new(),
            roots: Vec::new(),
            bound: Vec::new(),
            patches: PatchTable::new(),
            outstanding: HashMap::new(),
            type_ids: TypeIdReader::default(),
            lifecycle: Dispatcher::new(),
        }
    }

    pub(super) fn decode(
        mut self,
        bytes: Bytes,
        expected: &[TypeId],
    ) -> Result<Decoded, DecodeError> {
        let len = bytes.len();
        let limit = self.config.max_message_size;
        if len > limit {
            return Err(DecodeError::MessageTooLarge { size: len, limit });
        }

        let header = EncapsulationHeader::parse(&bytes)?;
        let version = header.version();
        if version != self.config.encoding {
            return Err(DecodeError::UnsupportedEncoding {
                major: version.major,
                minor: version.minor,
            });
        }
        let size = header.total_size();
        if size > len {
            return Err(DecodeError::TruncatedData { offset: len, needed: size - len });
        }
        if size < EncapsulationHeader::SIZE {
            return Err(DecodeError::corrupt(0, "encapsulation smaller than its header"));
        }
        if size < len {
            return Err(DecodeError::corrupt(size, "bytes after the encapsulation"));
        }
        debug!(bytes = len, %version, "decoding graph");

        let mut input = InputStream::new(bytes);
        input.skip(EncapsulationHeader::SIZE)?;

        let offset = input.offset();
        let count = input.read_size()?;
        if count != expected.len() {
            return Err(DecodeError::corrupt(
                offset,
                format!("expected {} roots, found {count}", expected.len()),
            ));
        }

        for index in 0..count {
            match self.decode_object(&mut input, 1)? {
                Resolved::Ready(id) => self.roots.push(id),
                Resolved::Pending(handle) => {
                    self.roots.push(None);
                    self.patches.defer(handle, PatchSite::Root(index));
                },
            }
        }

        if !input.is_empty() {
            return Err(DecodeError::corrupt(input.offset(), "bytes after the last root"));
        }
        if let Some(handle) = self.patches.first_unresolved() {
            return Err(DecodeError::UnresolvedReference { handle });
        }
        self.check_roots(expected)?;

        debug!(roots = count, objects = self.graph.len(), "decoded graph");
        Ok(Decoded { graph: self.graph, roots: self.roots })
    }

    fn check_roots(&self, expected: &[TypeId]) -> Result<(), DecodeError> {
        for (index, (root, base)) in self.roots.iter().zip(expected).enumerate() {
            let Some(id) = root else { continue };
            let found = self.graph.get(*id).and_then(Instance::type_id);
            if !found.is_some_and(|t| self.registry.is_a(t.as_str(), base.as_str())) {
                return Err(DecodeError::UnknownRootType {
                    index,
                    expected: base.clone(),
                    found: found.cloned(),
                });
            }
        }
        Ok(())
    }

    fn decode_object(
        &mut self,
        input: &mut InputStream,
        depth: usize,
    ) -> Result<Resolved, DecodeError> {
        let offset = input.offset();
        let byte = input.read_u8()?;
        let Some(marker) = ObjectMarker::from_u8(byte) else {
            let reason = format!("unknown object marker {byte:#04x}");
            return Err(DecodeError::corrupt(offset, reason));
        };

        match marker {
            ObjectMarker::Null => Ok(Resolved::Ready(None)),
            ObjectMarker::HandleRef => {
                let handle = read_handle(input)?;
                match self.binding(handle) {
                    Some(id) => Ok(Resolved::Ready(Some(id))),
                    None => Ok(Resolved::Pending(handle)),
                }
            },
            ObjectMarker::FirstOccurrence => {
                let handle = read_handle(input)?;
                let next = self.bound.len() + 1;
                if handle.get() as usize != next {
                    return Err(DecodeError::corrupt(
                        offset,
                        format!("first occurrence of {handle}, expected #{next}"),
                    ));
                }
                if depth > self.config.max_depth {
                    return Err(DecodeError::DepthExceeded { limit: self.config.max_depth });
                }
                self.bound.push(None);
                trace!(%handle, depth, "reading object");

                let id = self.read_slices(input, handle, depth)?;
                Ok(Resolved::Ready(Some(id)))
            },
        }
    }

    fn binding(&self, handle: Handle) -> Option<ObjectId> {
        let index = (handle.get() as usize).checked_sub(1)?;
        self.bound.get(index).copied().flatten()
    }

    fn read_slices(
        &mut self,
        input: &mut InputStream,
        handle: Handle,
        depth: usize,
    ) -> Result<ObjectId, DecodeError> {
        let registry = self.registry;
        let mut frame = Frame::default();
        let start = input.offset();

        loop {
            let offset = input.offset();
            let Some(header) = SliceHeader::from_byte(input.read_u8()?, offset)? else {
                break;
            };
            let key = self.type_ids.read_key(input, header.kind)?;
            let length = input.read_u32()? as usize;
            let mut payload = input.split(length)?;
            frame.read += 1;

            let known = match &key {
                SliceKey::Name(type_id) => registry.resolve_slice_chain(type_id.as_str()).ok(),
                SliceKey::Compact(compact_id) => registry
                    .lookup_compact(*compact_id)
                    .ok()
                    .and_then(|d| registry.resolve_slice_chain(d.type_id().as_str()).ok()),
            };

            match (known, frame.instance.is_some()) {
                (Some(slice_type), false) => {
                    let instance = registry
                        .instantiate(slice_type.type_id().as_str())
                        .map_err(|e| DecodeError::corrupt(offset, e.to_string()))?;
                    frame.instance = Some(instance);
                    self.read_known_slice(input, &mut frame, header, &mut payload, depth)?;
                },
                (Some(slice_type), true) => {
                    let expected = frame
                        .instance
                        .as_ref()
                        .and_then(Instance::chain)
                        .and_then(|chain| chain.layouts().get(frame.position))
                        .map(|layout| layout.descriptor().type_id());
                    if expected != Some(slice_type.type_id()) {
                        return Err(DecodeError::corrupt(
                            offset,
                            format!("slice {} out of inheritance order", slice_type.type_id()),
                        ));
                    }
                    self.read_known_slice(input, &mut frame, header, &mut payload, depth)?;
                },
                (None, true) => {
                    return Err(DecodeError::corrupt(
                        offset,
                        format!("unknown slice {key} below a known slice"),
                    ));
                },
                (None, false) => {
                    self.read_unknown_slice(input, &mut frame, header, key, &mut payload, depth)?;
                },
            }
        }

        let offset = input.offset();
        let instance = match frame.instance.take() {
            Some(mut instance) => {
                if let Some(missing) = instance
                    .chain()
                    .and_then(|chain| chain.layouts().get(frame.position))
                    .map(|layout| layout.descriptor().type_id().clone())
                {
                    let reason = format!("missing base slice {missing}");
                    return Err(DecodeError::corrupt(offset, reason));
                }
                instance.set_preserved(std::mem::take(&mut frame.preserved));
                instance
            },
            None if frame.read == 0 => {
                return Err(DecodeError::corrupt(start, "object without slices"));
            },
            None => Instance::opaque(std::mem::take(&mut frame.preserved)),
        };

        self.complete(handle, instance, frame.deferred)
    }

    fn read_known_slice(
        &mut self,
        input: &mut InputStream,
        frame: &mut Frame,
        header: SliceHeader,
        payload: &mut InputStream,
        depth: usize,
    ) -> Result<(), DecodeError> {
        let position = frame.position;
        let chain: Option<SliceChain> = frame.instance.as_ref().and_then(Instance::chain).cloned();
        let Some(layout) = chain.as_ref().and_then(|c| c.layouts().get(position)) else {
            return Err(DecodeError::corrupt(payload.offset(), "slice beyond the type's chain"));
        };

        let has_optional = header.flags.contains(SliceFlags::HAS_OPTIONAL_MEMBERS);
        // The payload was split off whole, so running out inside it means
        // the slice length is wrong, not that the message is cut short.
        let (values, refs) =
            fields::read_slice(payload, layout, has_optional).map_err(|e| match e {
                DecodeError::TruncatedData { offset, .. } => {
                    DecodeError::corrupt(offset, "slice shorter than its fields")
                },
                other => other,
            })?;
        if !payload.is_empty() {
            return Err(DecodeError::corrupt(payload.offset(), "slice longer than its fields"));
        }

        let table_offset = input.offset();
        let table = self.read_table(input, header.flags, depth)?;

        let Some(instance) = frame.instance.as_mut() else {
            return Err(DecodeError::corrupt(table_offset, "slice without an instance"));
        };
        if let Some(slot) = instance.values_mut(position) {
            *slot = values;
        }
        for table_ref in refs {
            let Some(entry) = table.get(table_ref.entry - 1) else {
                return Err(DecodeError::corrupt(
                    table_offset,
                    format!("reference to table entry {} of {}", table_ref.entry, table.len()),
                ));
            };
            let slot = Slot::Field { slice: position, field: table_ref.field, path: table_ref.path };
            match *entry {
                Resolved::Ready(Some(target)) => {
                    instance.patch(&slot, target);
                },
                Resolved::Ready(None) => {},
                Resolved::Pending(handle) => frame.deferred.push((slot, handle)),
            }
        }

        frame.position += 1;
        Ok(())
    }

    fn read_unknown_slice(
        &mut self,
        input: &mut InputStream,
        frame: &mut Frame,
        header: SliceHeader,
        key: SliceKey,
        payload: &mut InputStream,
        depth: usize,
    ) -> Result<(), DecodeError> {
        let bytes = payload.read_bytes(payload.remaining())?;
        debug!(
            %key,
            length = bytes.len(),
            policy = ?self.config.slice_policy,
            "skipping unknown slice"
        );

        let table = self.read_table(input, header.flags, depth)?;
        if self.config.slice_policy == SlicePolicy::Drop {
            return Ok(());
        }

        let slice = frame.preserved.len();
        let mut references = Vec::with_capacity(table.len());
        for (entry, resolved) in table.into_iter().enumerate() {
            match resolved {
                Resolved::Ready(id) => references.push(id),
                Resolved::Pending(handle) => {
                    references.push(None);
                    frame.deferred.push((Slot::Preserved { slice, entry }, handle));
                },
            }
        }

        let has_optional = header.flags.contains(SliceFlags::HAS_OPTIONAL_MEMBERS);
        frame.preserved.push(PreservedSlice::new(key, has_optional, bytes, references));
        Ok(())
    }

    fn read_table(
        &mut self,
        input: &mut InputStream,
        flags: SliceFlags,
        depth: usize,
    ) -> Result<Vec<Resolved>, DecodeError> {
        if !flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) {
            return Ok(Vec::new());
        }
        let count = input.read_size()?;
        input.check_sequence(count, 1)?;

        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
            table.push(self.decode_object(input, depth + 1)?);
        }
        Ok(table)
    }

    /// Move a finished object into the arena, bind its handle, and settle
    /// every patch that involves it.
    fn complete(
        &mut self,
        handle: Handle,
        instance: Instance,
        deferred: Vec<(Slot, Handle)>,
    ) -> Result<ObjectId, DecodeError> {
        let id = self.graph.insert(instance);
        self.lifecycle.slices_read(id)?;
        let index = (handle.get() as usize).checked_sub(1);
        if let Some(binding) = index.and_then(|i| self.bound.get_mut(i)) {
            *binding = Some(id);
        }

        let mut waiting = 0;
        for (slot, target) in deferred {
            match self.binding(target) {
                Some(target_id) => {
                    if let Some(instance) = self.graph.get_mut(id) {
                        instance.patch(&slot, target_id);
                    }
                },
                None => {
                    self.patches.defer(target, PatchSite::Field { owner: id, slot });
                    waiting += 1;
                },
            }
        }
        if waiting > 0 {
            self.outstanding.insert(id, waiting);
        }

        for site in self.patches.take(handle) {
            match site {
                PatchSite::Root(index) => {
                    if let Some(root) = self.roots.get_mut(index) {
                        *root = Some(id);
                    }
                },
                PatchSite::Field { owner, slot } => {
                    if let Some(instance) = self.graph.get_mut(owner) {
                        instance.patch(&slot, id);
                    }
                    let settled = match self.outstanding.get_mut(&owner) {
                        Some(count) => {
                            *count -= 1;
                            *count == 0
                        },
                        None => false,
                    };
                    if settled {
                        self.outstanding.remove(&owner);
                        self.post_unmarshal(owner)?;
                    }
                },
            }
        }

        if waiting == 0 {
            self.post_unmarshal(id)?;
        }
        Ok(id)
    }

    fn post_unmarshal(&mut self, id: ObjectId) -> Result<(), DecodeError> {
        match self.graph.get_mut(id) {
            Some(instance) => self.lifecycle.post_unmarshal(id, instance),
            None => Ok(()),
        }
    }
}

fn read_handle(input: &mut InputStream) -> Result<Handle, DecodeError> {
    let offset = input.offset();
    let raw = input.read_size()?;
    u32::try_from(raw)
        .ok()
        .and_then(Handle::new)
        .ok_or_else(|| DecodeError::corrupt(offset, format!("invalid handle {raw}")))
}
