//! Behaviour results awaiting aggregation, indexed by source behaviour.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::debug;

use crate::sync::{read, write};
use crate::types::{BehaviourId, Outcome, OutcomeId, OutcomeSet, StimulusId};

#[derive(Debug, Default)]
struct Inner {
    pool: HashMap<OutcomeId, Outcome>,
    by_behaviour: HashMap<BehaviourId, HashSet<OutcomeId>>,
}

impl Inner {
    fn insert(&mut self, outcome: Outcome) {
        let id = outcome.id.clone();
        if let Some(previous) = self.pool.remove(&id) {
            self.unindex(&previous);
        }
        if let Some(behaviour) = &outcome.source_behaviour {
            self.by_behaviour
                .entry(behaviour.clone())
                .or_default()
                .insert(id.clone());
        }
        self.pool.insert(id, outcome);
    }

    /// Drops `outcome` from its behaviour's index set, and the set itself once empty.
    fn unindex(&mut self, outcome: &Outcome) {
        let Some(behaviour) = &outcome.source_behaviour else {
            return;
        };
        if let Some(set) = self.by_behaviour.get_mut(behaviour) {
            if set.remove(&outcome.id) && set.is_empty() {
                self.by_behaviour.remove(behaviour);
            }
        }
    }

    fn remove(&mut self, id: &OutcomeId) -> Option<Outcome> {
        let removed = self.pool.remove(id)?;
        self.unindex(&removed);
        Some(removed)
    }
}

#[derive(Debug, Default)]
pub struct OutcomeCache {
    inner: RwLock<Inner>,
}

impl OutcomeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, outcome: Outcome) {
        write(&self.inner).insert(outcome);
    }

    /// Back-fill each member's missing source behaviour / affecting twin from
    /// the set header, then add it. Returns the outcomes as stored.
    pub fn add_set(&self, set: OutcomeSet) -> Vec<Outcome> {
        let OutcomeSet {
            source_behaviour,
            source_twin,
            outcomes,
        } = set;

        let filled: Vec<Outcome> = outcomes
            .into_iter()
            .map(|mut outcome| {
                if outcome.source_behaviour.is_none() {
                    outcome.source_behaviour = Some(source_behaviour.clone());
                }
                if outcome.affecting_twin.is_none() {
                    outcome.affecting_twin = Some(source_twin.clone());
                }
                outcome
            })
            .collect();

        let mut inner = write(&self.inner);
        for outcome in &filled {
            inner.insert(outcome.clone());
        }
        filled
    }

    pub fn remove(&self, id: &OutcomeId) -> Option<Outcome> {
        let removed = write(&self.inner).remove(id);
        if removed.is_none() {
            debug!(outcome = %id, "outcome cache remove: not present");
        }
        removed
    }

    pub fn get(&self, id: &OutcomeId) -> Option<Outcome> {
        read(&self.inner).pool.get(id).cloned()
    }

    pub fn get_by_behaviour(&self, behaviour: &BehaviourId) -> HashSet<OutcomeId> {
        read(&self.inner)
            .by_behaviour
            .get(behaviour)
            .cloned()
            .unwrap_or_default()
    }

    /// Linear scan; the pool only ever holds in-flight work.
    pub fn get_by_stimulus(&self, stimulus: &StimulusId) -> Vec<Outcome> {
        read(&self.inner)
            .pool
            .values()
            .filter(|o| &o.source_stimulus == stimulus)
            .cloned()
            .collect()
    }

    /// Purge every outcome derived from `stimulus`. Returns how many were removed.
    pub fn remove_all_for_stimulus(&self, stimulus: &StimulusId) -> usize {
        let mut inner = write(&self.inner);
        let doomed: Vec<OutcomeId> = inner
            .pool
            .values()
            .filter(|o| &o.source_stimulus == stimulus)
            .map(|o| o.id.clone())
            .collect();
        for id in &doomed {
            inner.remove(id);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        read(&self.inner).pool.len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.inner).pool.is_empty()
    }
}
