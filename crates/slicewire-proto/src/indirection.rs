//! Object identity tables.
//!
//! Both tables live for exactly one top-level encode or decode call.
//!
//! - [`IndirectionTable`] (encode side) hands out a [`Handle`] the first time
//!   an object is written. Later references to the same object write only the
//!   handle.
//! - [`PatchTable`] (decode side) records fix-ups for references to handles
//!   whose object is not yet available, such as a child pointing back at an
//!   ancestor still being decoded. Every entry must be drained before the call
//!   returns.

use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
};

/// Small integer naming one distinct object within a single call.
///
/// Handles start at 1 and are assigned in first-occurrence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    /// The first handle of a call.
    pub const FIRST: Self = Self(1);

    /// Wrap a raw handle value; zero is not a valid handle.
    pub fn new(raw: u32) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    /// Raw handle value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// The handle assigned after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of interning an object identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interned {
    /// First time this identity was seen; its slices must be written
    New(Handle),
    /// Already written; only the handle goes on the wire
    Existing(Handle),
}

impl Interned {
    /// The handle either way.
    pub fn handle(self) -> Handle {
        match self {
            Self::New(h) | Self::Existing(h) => h,
        }
    }
}

/// Encode-side map from object identity to handle.
#[derive(Debug)]
pub struct IndirectionTable<K> {
    handles: HashMap<K, Handle>,
    next: Handle,
}

impl<K: Hash + Eq> IndirectionTable<K> {
    /// Empty table; the first interned identity receives [`Handle::FIRST`].
    pub fn new() -> Self {
        Self { handles: HashMap::new(), next: Handle::FIRST }
    }

    /// Return the identity's handle, assigning the next one if unseen.
    pub fn intern(&mut self, key: K) -> Interned {
        if let Some(&handle) = self.handles.get(&key) {
            return Interned::Existing(handle);
        }

        let handle = self.next;
        self.next = handle.next();
        self.handles.insert(key, handle);
        Interned::New(handle)
    }

    /// Handle of an identity already interned.
    pub fn get(&self, key: &K) -> Option<Handle> {
        self.handles.get(key).copied()
    }

    /// Number of distinct identities interned.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<K: Hash + Eq> Default for IndirectionTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode-side list of pending fix-ups, keyed by the handle they wait on.
#[derive(Debug)]
pub struct PatchTable<S> {
    pending: BTreeMap<Handle, Vec<S>>,
}

impl<S> PatchTable<S> {
    /// Empty table.
    pub fn new() -> Self {
        Self { pending: BTreeMap::new() }
    }

    /// Record that `site` must be patched once `handle` resolves.
    pub fn defer(&mut self, handle: Handle, site: S) {
        self.pending.entry(handle).or_default().push(site);
    }

    /// Remove and return every site waiting on `handle`, in the order they
    /// were deferred.
    pub fn take(&mut self, handle: Handle) -> Vec<S> {
        self.pending.remove(&handle).unwrap_or_default()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total number of pending sites.
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Lowest handle that still has pending sites.
    pub fn first_unresolved(&self) -> Option<Handle> {
        self.pending.keys().next().copied()
    }
}

impl<S> Default for PatchTable<S> {
    fn default() -> Self {
        Self::new()
    }
}
