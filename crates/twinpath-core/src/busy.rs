//! Which twins currently have a behaviour invocation in flight.
//!
//! A twin appears here iff it has exactly one outstanding invocation;
//! absence means idle.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::sync::lock;
use crate::types::{BehaviourId, TwinId};

#[derive(Debug, Default)]
pub struct TwinBusyTable {
    active: Mutex<HashMap<TwinId, BehaviourId>>,
}

impl TwinBusyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `twin` busy running `behaviour`. Returns false (and changes
    /// nothing) if the twin is already busy.
    pub fn lock(&self, twin: &TwinId, behaviour: &BehaviourId) -> bool {
        let mut active = lock(&self.active);
        if active.contains_key(twin) {
            return false;
        }
        active.insert(twin.clone(), behaviour.clone());
        true
    }

    /// Run `claim` only if `twin` is idle, marking it busy with whatever
    /// behaviour `claim` yields. The check and the insert happen under one
    /// lock, so two callers can never both claim the same twin.
    pub fn claim_with<T>(
        &self,
        twin: &TwinId,
        claim: impl FnOnce() -> Option<(BehaviourId, T)>,
    ) -> Option<T> {
        let mut active = lock(&self.active);
        if active.contains_key(twin) {
            return None;
        }
        let (behaviour, claimed) = claim()?;
        active.insert(twin.clone(), behaviour);
        Some(claimed)
    }

    /// Clear the busy entry. Returns the behaviour that was running, if any.
    pub fn unlock(&self, twin: &TwinId) -> Option<BehaviourId> {
        let released = lock(&self.active).remove(twin);
        if released.is_none() {
            debug!(%twin, "unlock for twin that was not busy");
        }
        released
    }

    pub fn is_busy(&self, twin: &TwinId) -> bool {
        lock(&self.active).contains_key(twin)
    }

    pub fn active_behaviour(&self, twin: &TwinId) -> Option<BehaviourId> {
        lock(&self.active).get(twin).cloned()
    }

    pub fn busy_twins(&self) -> Vec<TwinId> {
        lock(&self.active).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.active).is_empty()
    }
}
