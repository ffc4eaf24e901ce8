//! Lifecycle hooks and the per-call state machine that orders them.
//!
//! Every instance touched by one encode or decode call moves through a fixed
//! sequence of states and never re-enters one:
//!
//! ```text
//! encode:  Constructed -> PreMarshalled -> SlicesWritten
//! decode:  Constructed -> SlicesRead -> PostUnmarshalled
//! ```
//!
//! The pre-marshal hook runs on the `PreMarshalled` transition, before any
//! byte of the instance is emitted. The post-unmarshal hook runs on the
//! `PostUnmarshalled` transition, once every slice is read and every
//! reference the instance is waiting on has been patched.

use std::collections::HashMap;

use tracing::warn;

use crate::{
    error::{DecodeError, EncodeError, HookError, LifecycleError},
    graph::{Instance, ObjectId},
};

/// Hooks a type may implement. Both default to doing nothing.
///
/// Hooks see only the instance they are attached to. A hook that returns an
/// error aborts the whole call.
pub trait Lifecycle: Send + Sync {
    /// Called immediately before the instance's slices are written.
    fn pre_marshal(&self, _instance: &mut Instance) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once the instance is fully decoded and its references resolved.
    fn post_unmarshal(&self, _instance: &mut Instance) -> Result<(), HookError> {
        Ok(())
    }
}

/// Where an instance is in its lifecycle within one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Built, not yet touched by the codec
    Constructed,
    /// Pre-marshal hook has run
    PreMarshalled,
    /// Every slice has been written
    SlicesWritten,
    /// Every slice has been read
    SlicesRead,
    /// Post-unmarshal hook has run
    PostUnmarshalled,
}

impl LifecycleState {
    fn allows(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Constructed, Self::PreMarshalled)
                | (Self::PreMarshalled, Self::SlicesWritten)
                | (Self::Constructed, Self::SlicesRead)
                | (Self::SlicesRead, Self::PostUnmarshalled)
        )
    }
}

/// Per-call record of each instance's state.
///
/// Instances not yet seen are `Constructed`.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    states: HashMap<ObjectId, LifecycleState>,
}

impl LifecycleTracker {
    /// Tracker with every instance `Constructed`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `object`.
    pub fn state(&self, object: ObjectId) -> LifecycleState {
        self.states.get(&object).copied().unwrap_or(LifecycleState::Constructed)
    }

    /// Move `object` to `to`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the move is not an edge of the state machine.
    pub fn advance(&mut self, object: ObjectId, to: LifecycleState) -> Result<(), LifecycleError> {
        let from = self.state(object);
        if !from.allows(to) {
            return Err(LifecycleError::InvalidTransition { object, from, to });
        }
        self.states.insert(object, to);
        Ok(())
    }
}

/// Runs hooks in step with the tracker.
#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    tracker: LifecycleTracker,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn pre_marshal(
        &mut self,
        object: ObjectId,
        instance: &mut Instance,
    ) -> Result<(), EncodeError> {
        self.tracker.advance(object, LifecycleState::PreMarshalled)?;
        let Some(chain) = instance.chain().cloned() else {
            return Ok(());
        };
        let Some(hooks) = chain.lifecycle() else {
            return Ok(());
        };

        hooks.pre_marshal(instance).map_err(|source| {
            warn!(%object, type_id = %chain.type_id(), error = %source, "pre-marshal hook failed");
            EncodeError::HookFailure { type_id: chain.type_id().clone(), source }
        })
    }

    pub(crate) fn slices_written(&mut self, object: ObjectId) -> Result<(), EncodeError> {
        Ok(self.tracker.advance(object, LifecycleState::SlicesWritten)?)
    }

    pub(crate) fn slices_read(&mut self, object: ObjectId) -> Result<(), DecodeError> {
        Ok(self.tracker.advance(object, LifecycleState::SlicesRead)?)
    }

    pub(crate) fn post_unmarshal(
        &mut self,
        object: ObjectId,
        instance: &mut Instance,
    ) -> Result<(), DecodeError> {
        self.tracker.advance(object, LifecycleState::PostUnmarshalled)?;
        let Some(chain) = instance.chain().cloned() else {
            return Ok(());
        };
        let Some(hooks) = chain.lifecycle() else {
            return Ok(());
        };

        hooks.post_unmarshal(instance).map_err(|source| {
            warn!(%object, type_id = %chain.type_id(), error = %source, "post-unmarshal hook failed");
            DecodeError::HookFailure { type_id: chain.type_id().clone(), source }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_path_is_linear() {
        let mut tracker = LifecycleTracker::new();
        let id = ObjectId::from_index(0);
        tracker.advance(id, LifecycleState::PreMarshalled).unwrap();
        tracker.advance(id, LifecycleState::SlicesWritten).unwrap();
        assert_eq!(tracker.state(id), LifecycleState::SlicesWritten);
    }

    #[test]
    fn re_entry_is_rejected() {
        let mut tracker = LifecycleTracker::new();
        let id = ObjectId::from_index(3);
        tracker.advance(id, LifecycleState::PreMarshalled).unwrap();

        let err = tracker.advance(id, LifecycleState::PreMarshalled).unwrap_err();
        assert_eq!(err, LifecycleError::InvalidTransition {
            object: id,
            from: LifecycleState::PreMarshalled,
            to: LifecycleState::PreMarshalled,
        });
    }

    #[test]
    fn paths_do_not_mix() {
        let mut tracker = LifecycleTracker::new();
        let id = ObjectId::from_index(1);
        tracker.advance(id, LifecycleState::SlicesRead).unwrap();
        assert!(tracker.advance(id, LifecycleState::SlicesWritten).is_err());
        assert!(tracker.advance(ObjectId::from_index(2), LifecycleState::PostUnmarshalled).is_err());
    }
}
