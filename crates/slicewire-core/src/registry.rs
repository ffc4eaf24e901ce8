//! Type registry.
//!
//! Types are collected in a [`RegistryBuilder`] at startup and then frozen
//! into an immutable [`TypeRegistry`]. Freezing validates the inheritance
//! relation and caches a [`SliceChain`] per type, so neither the encoder nor
//! the decoder ever walks parents at runtime.
//!
//! A frozen registry is shared read-only between any number of concurrent
//! encode and decode calls; cloning it copies a pointer.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use crate::{
    descriptor::{TypeDescriptor, TypeId},
    error::{FieldError, RegistryError},
    graph::Instance,
    lifecycle::Lifecycle,
};

/// Custom construction for a concrete type.
///
/// The registry first builds an instance with every field defaulted, then
/// lets the factory fill in initial values.
pub trait InstanceFactory: Send + Sync {
    /// Fill in a freshly defaulted instance.
    ///
    /// # Errors
    ///
    /// Whatever [`Instance::set`] reports for a bad initial value.
    fn populate(&self, instance: &mut Instance) -> Result<(), FieldError>;
}

/// One slice of a resolved chain, with its fields pre-sorted into wire order.
#[derive(Debug, Clone)]
pub struct SliceLayout {
    descriptor: Arc<TypeDescriptor>,
    required: Vec<usize>,
    optional: Vec<usize>,
}

impl SliceLayout {
    fn new(descriptor: Arc<TypeDescriptor>) -> Self {
        let (mut optional, required): (Vec<usize>, Vec<usize>) =
            (0..descriptor.fields().len()).partition(|&i| descriptor.fields()[i].is_optional());
        optional.sort_by_key(|&i| descriptor.fields()[i].tag);
        Self { descriptor, required, optional }
    }

    /// The type declaring this slice.
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Indices of required fields, in declaration order.
    pub fn required(&self) -> &[usize] {
        &self.required
    }

    /// Indices of optional fields, in ascending tag order.
    pub fn optional(&self) -> &[usize] {
        &self.optional
    }
}

struct ChainInner {
    type_id: TypeId,
    layouts: Vec<SliceLayout>,
    lifecycle: Option<Arc<dyn Lifecycle>>,
}

/// Slices of a type from most-derived to root, plus the hooks that apply.
#[derive(Clone)]
pub struct SliceChain {
    inner: Arc<ChainInner>,
}

impl SliceChain {
    /// The most-derived type.
    pub fn type_id(&self) -> &TypeId {
        &self.inner.type_id
    }

    /// Slices, most-derived first.
    pub fn layouts(&self) -> &[SliceLayout] {
        &self.inner.layouts
    }

    /// Number of slices.
    pub fn len(&self) -> usize {
        self.inner.layouts.len()
    }

    /// Always false; a chain has at least one slice.
    pub fn is_empty(&self) -> bool {
        self.inner.layouts.is_empty()
    }

    /// Hooks of the most-derived type that declares any.
    pub fn lifecycle(&self) -> Option<&Arc<dyn Lifecycle>> {
        self.inner.lifecycle.as_ref()
    }

    /// Position of `type_id` in the chain.
    pub fn position(&self, type_id: &str) -> Option<usize> {
        self.inner.layouts.iter().position(|l| l.descriptor.type_id().as_str() == type_id)
    }

    /// Slice and field index of `name`, most-derived match first.
    pub fn locate(&self, name: &str) -> Option<(usize, usize)> {
        self.inner
            .layouts
            .iter()
            .enumerate()
            .find_map(|(slice, l)| l.descriptor.field_index(name).map(|field| (slice, field)))
    }
}

impl fmt::Debug for SliceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&TypeId> = self.layouts().iter().map(|l| l.descriptor.type_id()).collect();
        f.debug_struct("SliceChain")
            .field("slices", &ids)
            .field("lifecycle", &self.inner.lifecycle.is_some())
            .finish()
    }
}

/// Collects type descriptors before freezing.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    types: Vec<Arc<TypeDescriptor>>,
    by_id: HashMap<TypeId, usize>,
    by_compact: HashMap<u32, TypeId>,
}

impl RegistryBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a type.
    ///
    /// # Errors
    ///
    /// `DuplicateType` if the id is taken, `DuplicateCompactId` if the
    /// compact id is.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<(), RegistryError> {
        let type_id = descriptor.type_id().clone();
        if self.by_id.contains_key(&type_id) {
            return Err(RegistryError::DuplicateType(type_id));
        }
        if let Some(compact_id) = descriptor.compact() {
            if let Some(first) = self.by_compact.get(&compact_id) {
                return Err(RegistryError::DuplicateCompactId {
                    compact_id,
                    first: first.clone(),
                    second: type_id,
                });
            }
            self.by_compact.insert(compact_id, type_id.clone());
        }

        self.by_id.insert(type_id, self.types.len());
        self.types.push(Arc::new(descriptor));
        Ok(())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Validate and freeze.
    ///
    /// # Errors
    ///
    /// `UnknownParent`, `InheritanceCycle`, `DuplicateTag` or `EmptyStruct`.
    pub fn freeze(self) -> Result<TypeRegistry, RegistryError> {
        for descriptor in &self.types {
            for field in descriptor.fields() {
                if let Some(empty) = field.kind.find_empty_struct() {
                    return Err(RegistryError::EmptyStruct {
                        type_id: descriptor.type_id().clone(),
                        field: field.name.clone(),
                        name: empty.name.clone(),
                    });
                }
            }

            let mut tags = HashSet::new();
            for tag in descriptor.fields().iter().filter_map(|f| f.tag) {
                if !tags.insert(tag) {
                    return Err(RegistryError::DuplicateTag {
                        type_id: descriptor.type_id().clone(),
                        tag,
                    });
                }
            }
        }

        let mut chains = HashMap::with_capacity(self.types.len());
        for descriptor in &self.types {
            let chain = self.resolve(descriptor)?;
            chains.insert(descriptor.type_id().clone(), chain);
        }

        Ok(TypeRegistry {
            inner: Arc::new(RegistryInner { chains, by_compact: self.by_compact }),
        })
    }

    fn resolve(&self, leaf: &Arc<TypeDescriptor>) -> Result<SliceChain, RegistryError> {
        let mut layouts = vec![SliceLayout::new(Arc::clone(leaf))];
        let mut current = leaf;

        while let Some(parent) = current.parent() {
            if layouts.len() > self.types.len() {
                return Err(RegistryError::InheritanceCycle(leaf.type_id().clone()));
            }
            let Some(&index) = self.by_id.get(parent) else {
                return Err(RegistryError::UnknownParent {
                    type_id: current.type_id().clone(),
                    parent: parent.clone(),
                });
            };
            current = &self.types[index];
            layouts.push(SliceLayout::new(Arc::clone(current)));
        }

        let lifecycle = layouts.iter().find_map(|l| l.descriptor.lifecycle().cloned());
        Ok(SliceChain {
            inner: Arc::new(ChainInner { type_id: leaf.type_id().clone(), layouts, lifecycle }),
        })
    }
}

#[derive(Debug)]
struct RegistryInner {
    chains: HashMap<TypeId, SliceChain>,
    by_compact: HashMap<u32, TypeId>,
}

/// Frozen, immutable set of types.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    inner: Arc<RegistryInner>,
}

impl TypeRegistry {
    /// Descriptor of `type_id`.
    ///
    /// # Errors
    ///
    /// `UnknownType` if it is not registered.
    pub fn lookup(&self, type_id: &str) -> Result<&TypeDescriptor, RegistryError> {
        let chain = self.resolve_slice_chain(type_id)?;
        chain
            .layouts()
            .first()
            .map(SliceLayout::descriptor)
            .ok_or_else(|| RegistryError::UnknownType(TypeId::from(type_id)))
    }

    /// Descriptor of the type carrying `compact_id`.
    ///
    /// # Errors
    ///
    /// `UnknownCompactId` if no type carries it.
    pub fn lookup_compact(&self, compact_id: u32) -> Result<&TypeDescriptor, RegistryError> {
        let type_id = self
            .inner
            .by_compact
            .get(&compact_id)
            .ok_or(RegistryError::UnknownCompactId(compact_id))?;
        self.lookup(type_id.as_str())
    }

    /// Slices of `type_id` from most-derived to root.
    ///
    /// # Errors
    ///
    /// `UnknownType` if it is not registered.
    pub fn resolve_slice_chain(&self, type_id: &str) -> Result<&SliceChain, RegistryError> {
        self.inner
            .chains
            .get(type_id)
            .ok_or_else(|| RegistryError::UnknownType(TypeId::from(type_id)))
    }

    /// New instance of `type_id` with every field defaulted, then passed
    /// through the type's factory if it has one.
    ///
    /// # Errors
    ///
    /// `UnknownType` if it is not registered, `Factory` if its factory
    /// fails.
    pub fn instantiate(&self, type_id: &str) -> Result<Instance, RegistryError> {
        let chain = self.resolve_slice_chain(type_id)?;
        let mut instance = Instance::new(chain.clone());
        if let Some(factory) = chain.layouts().first().and_then(|l| l.descriptor.factory()) {
            factory.populate(&mut instance).map_err(RegistryError::Factory)?;
        }
        Ok(instance)
    }

    /// True if `type_id` is `base` or derives from it.
    pub fn is_a(&self, type_id: &str, base: &str) -> bool {
        self.inner.chains.get(type_id).is_some_and(|chain| chain.position(base).is_some())
    }

    /// True if `type_id` is registered.
    pub fn contains(&self, type_id: &str) -> bool {
        self.inner.chains.contains_key(type_id)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.inner.chains.len()
    }

    /// True if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        descriptor::{FieldDescriptor, StructDescriptor, WireKind},
        error::HookError,
        value::Value,
    };

    fn base() -> TypeDescriptor {
        TypeDescriptor::new("::T::Base").field(FieldDescriptor::required("id", WireKind::Int))
    }

    #[test]
    fn duplicate_type_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register(base()).unwrap();
        assert_eq!(
            builder.register(base()),
            Err(RegistryError::DuplicateType(TypeId::from("::T::Base")))
        );
    }

    #[test]
    fn duplicate_compact_id_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register(TypeDescriptor::new("::A").compact_id(4)).unwrap();
        let err = builder.register(TypeDescriptor::new("::B").compact_id(4)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCompactId { compact_id: 4, .. }));
    }

    #[test]
    fn chain_runs_most_derived_to_root() {
        let mut builder = RegistryBuilder::new();
        builder.register(TypeDescriptor::new("::T::Leaf").extends("::T::Mid")).unwrap();
        builder.register(TypeDescriptor::new("::T::Mid").extends("::T::Base")).unwrap();
        builder.register(base()).unwrap();
        let registry = builder.freeze().unwrap();

        let chain = registry.resolve_slice_chain("::T::Leaf").unwrap();
        let ids: Vec<&str> = chain.layouts().iter().map(|l| l.descriptor().type_id().as_str()).collect();
        assert_eq!(ids, ["::T::Leaf", "::T::Mid", "::T::Base"]);
        assert!(registry.is_a("::T::Leaf", "::T::Base"));
        assert!(!registry.is_a("::T::Base", "::T::Leaf"));
        assert!(!registry.is_a("::T::Nope", "::T::Base"));
    }

    #[test]
    fn unknown_parent_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register(TypeDescriptor::new("::T::Orphan").extends("::T::Gone")).unwrap();
        assert!(matches!(builder.freeze(), Err(RegistryError::UnknownParent { .. })));
    }

    #[test]
    fn inheritance_cycle_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register(TypeDescriptor::new("::A").extends("::B")).unwrap();
        builder.register(TypeDescriptor::new("::B").extends("::A")).unwrap();
        assert!(matches!(builder.freeze(), Err(RegistryError::InheritanceCycle(_))));
    }

    #[test]
    fn duplicate_tag_rejected() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                TypeDescriptor::new("::T")
                    .field(FieldDescriptor::optional("a", WireKind::Int, 2))
                    .field(FieldDescriptor::optional("b", WireKind::Long, 2)),
            )
            .unwrap();
        assert!(matches!(builder.freeze(), Err(RegistryError::DuplicateTag { tag: 2, .. })));
    }

    #[test]
    fn optional_fields_sorted_by_tag() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                TypeDescriptor::new("::T")
                    .field(FieldDescriptor::optional("late", WireKind::Int, 9))
                    .field(FieldDescriptor::required("name", WireKind::String))
                    .field(FieldDescriptor::optional("early", WireKind::Int, 1)),
            )
            .unwrap();
        let registry = builder.freeze().unwrap();
        let layout = &registry.resolve_slice_chain("::T").unwrap().layouts()[0];
        assert_eq!(layout.required(), &[1]);
        assert_eq!(layout.optional(), &[2, 0]);
    }

    #[test]
    fn compact_lookup_and_unknown_type() {
        let mut builder = RegistryBuilder::new();
        builder.register(base().compact_id(12)).unwrap();
        let registry = builder.freeze().unwrap();

        assert_eq!(registry.lookup_compact(12).unwrap().type_id().as_str(), "::T::Base");
        assert_eq!(registry.lookup_compact(13).unwrap_err(), RegistryError::UnknownCompactId(13));
        assert!(matches!(registry.lookup("::T::Nope"), Err(RegistryError::UnknownType(_))));
    }

    struct Counting(AtomicUsize);

    impl Lifecycle for Counting {
        fn pre_marshal(&self, _instance: &mut Instance) -> Result<(), HookError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StartAtTen;

    impl InstanceFactory for StartAtTen {
        fn populate(&self, instance: &mut Instance) -> Result<(), FieldError> {
            instance.set("id", 10)
        }
    }

    struct WrongKind;

    impl InstanceFactory for WrongKind {
        fn populate(&self, instance: &mut Instance) -> Result<(), FieldError> {
            instance.set("id", "ten")
        }
    }

    #[test]
    fn derived_types_inherit_hooks_and_factories_apply() {
        let hooks: Arc<dyn Lifecycle> = Arc::new(Counting(AtomicUsize::new(0)));
        let mut builder = RegistryBuilder::new();
        builder.register(base().with_lifecycle(Arc::clone(&hooks))).unwrap();
        builder
            .register(
                TypeDescriptor::new("::T::Derived")
                    .extends("::T::Base")
                    .with_factory(Arc::new(StartAtTen)),
            )
            .unwrap();
        let registry = builder.freeze().unwrap();

        let chain = registry.resolve_slice_chain("::T::Derived").unwrap();
        assert!(chain.lifecycle().is_some_and(|l| Arc::ptr_eq(l, &hooks)));

        let instance = registry.instantiate("::T::Derived").unwrap();
        assert_eq!(instance.get("id"), Some(&Value::Int(10)));
    }

    #[test]
    fn failing_factory_fails_instantiate() {
        let mut builder = RegistryBuilder::new();
        builder.register(base().with_factory(Arc::new(WrongKind))).unwrap();
        let registry = builder.freeze().unwrap();

        let err = registry.instantiate("::T::Base").unwrap_err();
        assert_eq!(
            err,
            RegistryError::Factory(FieldError::KindMismatch {
                type_id: TypeId::from("::T::Base"),
                field: "id".into(),
            })
        );
    }

    #[test]
    fn memberless_struct_rejected_at_freeze() {
        let empty = StructDescriptor::new("Empty");
        let mut builder = RegistryBuilder::new();
        builder
            .register(TypeDescriptor::new("::T::Holder").field(FieldDescriptor::required(
                "items",
                WireKind::sequence(WireKind::Struct(empty)),
            )))
            .unwrap();

        assert_eq!(
            builder.freeze().unwrap_err(),
            RegistryError::EmptyStruct {
                type_id: TypeId::from("::T::Holder"),
                field: "items".into(),
                name: "Empty".into(),
            }
        );
    }

    #[test]
    fn struct_nesting_an_empty_struct_rejected() {
        let outer = StructDescriptor::new("Outer")
            .member("x", WireKind::Int)
            .member("inner", WireKind::Struct(StructDescriptor::new("Inner")));
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                TypeDescriptor::new("::T::Holder")
                    .field(FieldDescriptor::optional("outer", WireKind::Struct(outer), 1)),
            )
            .unwrap();

        assert!(matches!(
            builder.freeze(),
            Err(RegistryError::EmptyStruct { name, .. }) if name == "Inner"
        ));
    }

    #[test]
    fn registry_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypeRegistry>();
        assert_send_sync::<SliceChain>();
    }
}
