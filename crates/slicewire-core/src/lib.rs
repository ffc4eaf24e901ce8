//! Slicewire core logic
//!
//! Encodes and decodes polymorphic, possibly cyclic object graphs into the
//! slice format defined by `slicewire-proto`. Decoding is forward
//! compatible: a receiver that knows only a base type can still read a
//! derived instance, and slices it does not know are kept so a relay can
//! pass them on unchanged.
//!
//! # Architecture
//!
//! Schema information is built once into an immutable [`TypeRegistry`]. An
//! object graph lives in a [`Graph`] arena; references between instances
//! are [`ObjectId`]s, so sharing and cycles are ordinary values. A
//! [`Marshaller`] runs each encode or decode call with its own identity
//! tables and lifecycle tracker, and nothing survives the call except the
//! produced bytes or graph.
//!
//! No I/O happens here. The caller supplies bytes and receives bytes.
//!
//! # Components
//!
//! - [`descriptor`]: Type, field and wire-kind declarations
//! - [`registry`]: Build-then-freeze type registry and resolved slice chains
//! - [`schema`]: CBOR schema documents
//! - [`graph`]: Instance arena
//! - [`value`]: Field values
//! - [`lifecycle`]: Pre-marshal and post-unmarshal hooks and their ordering
//! - [`codec`]: Encoder and decoder
//! - [`config`]: Marshalling options and limits
//! - [`error`]: Error types

pub mod codec;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod registry;
pub mod schema;
pub mod value;

pub use codec::{Decoded, Marshaller};
pub use config::{MarshalConfig, SlicePolicy};
pub use descriptor::{FieldDescriptor, StructDescriptor, TypeDescriptor, TypeId, WireKind};
pub use error::{DecodeError, EncodeError, FieldError, HookError, LifecycleError, RegistryError};
pub use graph::{Graph, Instance, ObjectId, PreservedSlice, SliceKey};
pub use lifecycle::{Lifecycle, LifecycleState, LifecycleTracker};
pub use registry::{InstanceFactory, RegistryBuilder, SliceChain, SliceLayout, TypeRegistry};
pub use schema::{SchemaDocument, TypeSchema};
pub use value::Value;
