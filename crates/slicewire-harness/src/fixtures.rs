//! Fixture schemas.
//!
//! ```text
//! ::Test::Base            id, label, [1] note, [2] weight
//!   └─ ::Test::Derived    extra, point{x, y}, peers[], [3] owner, [40] big
//! ::Test::Node            value, next, other
//! ::Test::Leaf (#7)       flag, count, bytes[]
//! ```
//!
//! Bracketed fields are optional, with their tags. `Leaf` has compact id 7.

use std::sync::{Arc, Mutex};

use slicewire_core::{
    FieldDescriptor, FieldError, HookError, Instance, InstanceFactory, Lifecycle, MarshalConfig,
    Marshaller, ObjectId, RegistryBuilder, RegistryError, StructDescriptor, TypeDescriptor,
    TypeId, TypeRegistry, Value, WireKind,
};

/// Base type with two optional members.
pub const BASE: &str = "::Test::Base";
/// Derives from [`BASE`].
pub const DERIVED: &str = "::Test::Derived";
/// Linked node with two references.
pub const NODE: &str = "::Test::Node";
/// Small type declared with a compact id.
pub const LEAF: &str = "::Test::Leaf";
/// Compact id of [`LEAF`].
pub const LEAF_COMPACT_ID: u32 = 7;

/// Label a fresh `Base` gets from its factory.
pub const DEFAULT_LABEL: &str = "unnamed";

/// Added to a node's `value` by the recording pre-marshal hook.
pub const PRE_MARSHAL_BUMP: i32 = 1000;

/// Which hook fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    /// `pre_marshal`
    PreMarshal,
    /// `post_unmarshal`
    PostUnmarshal,
}

/// What a recording hook saw when it fired.
#[derive(Debug, Clone, PartialEq)]
pub struct HookEvent {
    /// Hook that fired
    pub stage: HookStage,
    /// Type of the instance
    pub type_id: Option<TypeId>,
    /// The instance's `value` or `id` field at that moment
    pub key: Option<i32>,
    /// The instance's `next` or `owner` reference at that moment
    pub link: Option<ObjectId>,
    /// Base-slice `label` at that moment, for derived instances
    pub label: Option<String>,
}

/// Shared record of hook events, in firing order.
pub type HookLog = Arc<Mutex<Vec<HookEvent>>>;

struct Recorder {
    log: HookLog,
}

impl Recorder {
    fn record(&self, stage: HookStage, instance: &Instance) -> Result<(), HookError> {
        let key = instance.get("value").or_else(|| instance.get("id")).and_then(Value::as_int);
        let link = instance.get("next").or_else(|| instance.get("owner")).and_then(Value::as_object);
        let label = instance.get_in(BASE, "label").and_then(Value::as_str).map(str::to_owned);
        let event = HookEvent { stage, type_id: instance.type_id().cloned(), key, link, label };

        self.log.lock().map_err(|_| HookError::new("hook log poisoned"))?.push(event);
        Ok(())
    }
}

impl Lifecycle for Recorder {
    fn pre_marshal(&self, instance: &mut Instance) -> Result<(), HookError> {
        self.record(HookStage::PreMarshal, instance)?;
        if let Some(value) = instance.get("value").and_then(Value::as_int) {
            instance
                .set("value", value.wrapping_add(PRE_MARSHAL_BUMP))
                .map_err(|e| HookError::new(e.to_string()))?;
        }
        Ok(())
    }

    fn post_unmarshal(&self, instance: &mut Instance) -> Result<(), HookError> {
        self.record(HookStage::PostUnmarshal, instance)
    }
}

/// Hook that fails at one stage.
struct Failing(HookStage);

impl Lifecycle for Failing {
    fn pre_marshal(&self, _instance: &mut Instance) -> Result<(), HookError> {
        match self.0 {
            HookStage::PreMarshal => Err(HookError::new("refusing to marshal")),
            HookStage::PostUnmarshal => Ok(()),
        }
    }

    fn post_unmarshal(&self, _instance: &mut Instance) -> Result<(), HookError> {
        match self.0 {
            HookStage::PostUnmarshal => Err(HookError::new("refusing to unmarshal")),
            HookStage::PreMarshal => Ok(()),
        }
    }
}

struct LabelFactory;

impl InstanceFactory for LabelFactory {
    fn populate(&self, instance: &mut Instance) -> Result<(), FieldError> {
        instance.set_in(BASE, "label", DEFAULT_LABEL)
    }
}

fn point() -> WireKind {
    WireKind::Struct(
        StructDescriptor::new("Point").member("x", WireKind::Float).member("y", WireKind::Float),
    )
}

/// `::Test::Base` descriptor.
pub fn base() -> TypeDescriptor {
    TypeDescriptor::new(BASE)
        .field(FieldDescriptor::required("id", WireKind::Int))
        .field(FieldDescriptor::required("label", WireKind::String))
        .field(FieldDescriptor::optional("note", WireKind::String, 1))
        .field(FieldDescriptor::optional("weight", WireKind::Double, 2))
        .with_factory(Arc::new(LabelFactory))
}

/// `::Test::Derived` descriptor.
pub fn derived() -> TypeDescriptor {
    TypeDescriptor::new(DERIVED)
        .extends(BASE)
        .field(FieldDescriptor::required("extra", WireKind::Long))
        .field(FieldDescriptor::required("point", point()))
        .field(FieldDescriptor::required("peers", WireKind::sequence(WireKind::Object)))
        .field(FieldDescriptor::optional("owner", WireKind::Object, 3))
        .field(FieldDescriptor::optional("big", WireKind::Int, 40))
        .with_factory(Arc::new(LabelFactory))
}

/// `::Test::Node` descriptor.
pub fn node() -> TypeDescriptor {
    TypeDescriptor::new(NODE)
        .field(FieldDescriptor::required("value", WireKind::Int))
        .field(FieldDescriptor::required("next", WireKind::Object))
        .field(FieldDescriptor::required("other", WireKind::Object))
}

/// `::Test::Leaf` descriptor.
pub fn leaf() -> TypeDescriptor {
    TypeDescriptor::new(LEAF)
        .compact_id(LEAF_COMPACT_ID)
        .field(FieldDescriptor::required("flag", WireKind::Bool))
        .field(FieldDescriptor::required("count", WireKind::Short))
        .field(FieldDescriptor::required("bytes", WireKind::sequence(WireKind::Byte)))
}

fn build(descriptors: impl IntoIterator<Item = TypeDescriptor>) -> Result<TypeRegistry, RegistryError> {
    let mut builder = RegistryBuilder::new();
    for descriptor in descriptors {
        builder.register(descriptor)?;
    }
    builder.freeze()
}

/// Every fixture type, no hooks.
pub fn registry() -> Result<TypeRegistry, RegistryError> {
    build([base(), derived(), node(), leaf()])
}

/// Only `Base`, as seen by a peer built before `Derived` existed.
pub fn base_only_registry() -> Result<TypeRegistry, RegistryError> {
    build([base(), node()])
}

/// Every fixture type, with `Node` and `Base` (and so `Derived`) recording
/// into `log`.
pub fn recording_registry(log: &HookLog) -> Result<TypeRegistry, RegistryError> {
    let hooks: Arc<dyn Lifecycle> = Arc::new(Recorder { log: Arc::clone(log) });
    build([
        base().with_lifecycle(Arc::clone(&hooks)),
        derived(),
        node().with_lifecycle(hooks),
        leaf(),
    ])
}

/// Every fixture type, with `Node` hooks failing at `stage`.
pub fn failing_registry(stage: HookStage) -> Result<TypeRegistry, RegistryError> {
    build([base(), derived(), node().with_lifecycle(Arc::new(Failing(stage))), leaf()])
}

/// Marshaller over [`registry`] with default options.
pub fn marshaller() -> Result<Marshaller, RegistryError> {
    Ok(Marshaller::new(registry()?, MarshalConfig::default()))
}

/// New shared hook log.
pub fn hook_log() -> HookLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Copy of the events recorded so far.
pub fn events(log: &HookLog) -> Vec<HookEvent> {
    log.lock().map(|events| events.clone()).unwrap_or_default()
}
