//! Registered stimuli plus the reverse index from originating UoW to stimuli.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::sync::{read, write};
use crate::types::{Stimulus, StimulusId, UowId};

#[derive(Debug, Default)]
struct Inner {
    pool: HashMap<StimulusId, Arc<Stimulus>>,
    by_uow: HashMap<UowId, HashSet<StimulusId>>,
}

impl Inner {
    fn unindex(&mut self, stimulus: &StimulusId, uow: &UowId) {
        if let Some(set) = self.by_uow.get_mut(uow) {
            set.remove(stimulus);
            if set.is_empty() {
                self.by_uow.remove(uow);
            }
        }
    }
}

/// Pool and index live behind one lock so every indexed id always resolves
/// to a pooled stimulus.
#[derive(Debug, Default)]
pub struct StimulusCache {
    inner: RwLock<Inner>,
}

impl StimulusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a stimulus and index it under its originating UoW.
    pub fn add(&self, stimulus: Arc<Stimulus>) {
        let mut inner = write(&self.inner);
        let id = stimulus.id.clone();
        if let Some(previous) = inner.pool.insert(id.clone(), stimulus.clone()) {
            if let Some(old_uow) = &previous.uow {
                inner.unindex(&id, old_uow);
            }
        }
        match &stimulus.uow {
            Some(uow) => {
                inner
                    .by_uow
                    .entry(uow.clone())
                    .or_default()
                    .insert(id.clone());
            }
            None => debug!(stimulus = %id, "stimulus has no originating uow; not indexed"),
        }
    }

    pub fn remove(&self, id: &StimulusId) -> Option<Arc<Stimulus>> {
        let mut inner = write(&self.inner);
        let Some(removed) = inner.pool.remove(id) else {
            debug!(stimulus = %id, "stimulus cache remove: not present");
            return None;
        };
        if let Some(uow) = &removed.uow {
            inner.unindex(id, uow);
        }
        Some(removed)
    }

    pub fn get(&self, id: &StimulusId) -> Option<Arc<Stimulus>> {
        read(&self.inner).pool.get(id).cloned()
    }

    /// Stimuli decomposed from `uow`. Empty when the UoW is unknown.
    pub fn get_for_uow(&self, uow: &UowId) -> HashSet<StimulusId> {
        read(&self.inner)
            .by_uow
            .get(uow)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        read(&self.inner).pool.len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.inner).pool.is_empty()
    }

    #[cfg(test)]
    fn indexed_uows(&self) -> usize {
        read(&self.inner).by_uow.len()
    }
}
