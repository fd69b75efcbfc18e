//! Completion ledger for the fan-out of every UoW.
//!
//! Each (stimulus, twin, behaviour) triple spawned from a UoW gets one
//! entry, recorded `Queued` when its package is enqueued and flipped to
//! `Finished` when the behaviour reports back. A UoW is done when every entry
//! under it is `Finished`.
//!
//! ```text
//! UowId ─► UowLedger
//!            ├─ stimuli            {StimulusId}
//!            ├─ twins              {(StimulusId, TwinId)}
//!            ├─ entries            (StimulusId, TwinId, BehaviourId) ─► CausalStatus
//!            └─ sealed             set once aggregation has been claimed
//! ```
//!
//! The leaf map is keyed by the full triple instead of nesting one map per
//! level; the two association sets keep the intermediate levels observable
//! for callers that register a stimulus or twin before any behaviour.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::sync::{read, write};
use crate::types::{BehaviourId, StimulusId, TwinId, UowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalStatus {
    Queued,
    Finished,
}

impl fmt::Display for CausalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CausalStatus::Queued => f.write_str("queued"),
            CausalStatus::Finished => f.write_str("finished"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CausalKey {
    pub stimulus: StimulusId,
    pub twin: TwinId,
    pub behaviour: BehaviourId,
}

#[derive(Debug, Default)]
struct UowLedger {
    stimuli: HashSet<StimulusId>,
    twins: HashSet<(StimulusId, TwinId)>,
    entries: HashMap<CausalKey, CausalStatus>,
    sealed: bool,
}

impl UowLedger {
    fn ensure_stimulus(&mut self, stimulus: &StimulusId) {
        self.stimuli.insert(stimulus.clone());
    }

    fn ensure_twin(&mut self, twin: &TwinId, stimulus: &StimulusId) {
        self.ensure_stimulus(stimulus);
        self.twins.insert((stimulus.clone(), twin.clone()));
    }

    fn ensure_behaviour(
        &mut self,
        behaviour: &BehaviourId,
        twin: &TwinId,
        stimulus: &StimulusId,
    ) -> &mut CausalStatus {
        self.ensure_twin(twin, stimulus);
        self.entries
            .entry(CausalKey {
                stimulus: stimulus.clone(),
                twin: twin.clone(),
                behaviour: behaviour.clone(),
            })
            .or_insert(CausalStatus::Queued)
    }

    fn all_finished(&self) -> bool {
        self.entries
            .values()
            .all(|status| *status == CausalStatus::Finished)
    }
}

#[derive(Debug, Default)]
pub struct CausalityTracker {
    ledgers: RwLock<HashMap<UowId, UowLedger>>,
}

impl CausalityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_uow(&self, uow: &UowId) {
        write(&self.ledgers).entry(uow.clone()).or_default();
    }

    pub fn ensure_stimulus_under_uow(&self, stimulus: &StimulusId, uow: &UowId) {
        write(&self.ledgers)
            .entry(uow.clone())
            .or_default()
            .ensure_stimulus(stimulus);
    }

    pub fn ensure_twin_under_stimulus(&self, twin: &TwinId, stimulus: &StimulusId, uow: &UowId) {
        write(&self.ledgers)
            .entry(uow.clone())
            .or_default()
            .ensure_twin(twin, stimulus);
    }

    /// Creates the triple as `Queued` if it does not exist yet; an existing
    /// entry keeps its status.
    pub fn ensure_behaviour_under_twin(
        &self,
        behaviour: &BehaviourId,
        twin: &TwinId,
        stimulus: &StimulusId,
        uow: &UowId,
    ) {
        write(&self.ledgers)
            .entry(uow.clone())
            .or_default()
            .ensure_behaviour(behaviour, twin, stimulus);
    }

    pub fn set_status(
        &self,
        status: CausalStatus,
        behaviour: &BehaviourId,
        twin: &TwinId,
        stimulus: &StimulusId,
        uow: &UowId,
    ) {
        let mut ledgers = write(&self.ledgers);
        let entry = ledgers
            .entry(uow.clone())
            .or_default()
            .ensure_behaviour(behaviour, twin, stimulus);
        *entry = status;
        trace!(%uow, %stimulus, %twin, %behaviour, %status, "causality status set");
    }

    pub fn status(
        &self,
        behaviour: &BehaviourId,
        twin: &TwinId,
        stimulus: &StimulusId,
        uow: &UowId,
    ) -> Option<CausalStatus> {
        let key = CausalKey {
            stimulus: stimulus.clone(),
            twin: twin.clone(),
            behaviour: behaviour.clone(),
        };
        read(&self.ledgers)
            .get(uow)
            .and_then(|ledger| ledger.entries.get(&key).copied())
    }

    /// True when the UoW is unknown (nothing outstanding) or every triple
    /// under it is `Finished`.
    pub fn is_fully_finished(&self, uow: &UowId) -> bool {
        match read(&self.ledgers).get(uow) {
            Some(ledger) => ledger.all_finished(),
            None => {
                debug!(%uow, "completion check for unknown uow: vacuously finished");
                true
            }
        }
    }

    /// Atomically check for completion and claim the right to aggregate.
    ///
    /// Returns true for exactly one caller per ledger: the first to observe
    /// every triple `Finished`. Unknown UoWs have nothing to aggregate.
    pub fn try_begin_aggregation(&self, uow: &UowId) -> bool {
        let mut ledgers = write(&self.ledgers);
        let Some(ledger) = ledgers.get_mut(uow) else {
            return false;
        };
        if ledger.sealed || !ledger.all_finished() {
            return false;
        }
        ledger.sealed = true;
        true
    }

    /// Forget everything recorded for `uow`. Returns whether it was tracked.
    pub fn purge(&self, uow: &UowId) -> bool {
        write(&self.ledgers).remove(uow).is_some()
    }

    pub fn is_tracked(&self, uow: &UowId) -> bool {
        read(&self.ledgers).contains_key(uow)
    }

    pub fn tracked_uows(&self) -> usize {
        read(&self.ledgers).len()
    }

    /// Number of (stimulus, twin, behaviour) triples recorded under `uow`.
    pub fn entry_count(&self, uow: &UowId) -> usize {
        read(&self.ledgers)
            .get(uow)
            .map_or(0, |ledger| ledger.entries.len())
    }

    pub fn stimuli_under(&self, uow: &UowId) -> HashSet<StimulusId> {
        read(&self.ledgers)
            .get(uow)
            .map(|ledger| ledger.stimuli.clone())
            .unwrap_or_default()
    }

    pub fn twins_under(&self, stimulus: &StimulusId, uow: &UowId) -> HashSet<TwinId> {
        read(&self.ledgers)
            .get(uow)
            .map(|ledger| {
                ledger
                    .twins
                    .iter()
                    .filter(|(s, _)| s == stimulus)
                    .map(|(_, t)| t.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
