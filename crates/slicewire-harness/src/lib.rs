//! Test harness for slicewire.
//!
//! Fixture schemas with lifecycle hooks, deterministic random graph
//! generation, a graph isomorphism oracle, and a scanner that finds slice
//! frames inside encoded bytes so tests can cut and splice them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generator;
pub mod oracle;
pub mod scanner;

pub use fixtures::{HookEvent, HookLog, HookStage};
pub use generator::{BuildError, BuiltGraph, GraphGenerator, GraphSpec, NodeKind, NodeSpec};
pub use oracle::{Mismatch, check_isomorphic};
pub use scanner::{Scan, ScanError, ScannedKey, SliceFrame, scan, set_total_size, strip_frame};
