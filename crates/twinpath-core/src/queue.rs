//! One FIFO queue of stimulus packages per digital twin.
//!
//! Each twin's queue sits behind its own mutex, so enqueue/dequeue on
//! unrelated twins never contend. The outer map lock is only held long enough
//! to look up, insert or remove a slot.
//!
//! A queue that drains is removed from the map. The dequeuer marks the slot
//! `retired` while still holding the slot lock; an enqueuer that raced for the
//! same slot sees the flag once it gets the lock and retries against a fresh
//! slot, so no package is ever pushed into a detached queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, trace};

use crate::sync::{lock, read, write};
use crate::types::{StimulusPackage, TwinId};

#[derive(Debug, Default)]
struct Slot {
    packages: VecDeque<StimulusPackage>,
    retired: bool,
}

type SlotRef = Arc<Mutex<Slot>>;

#[derive(Debug, Default)]
pub struct TwinWorkQueues {
    slots: RwLock<HashMap<TwinId, SlotRef>>,
}

impl TwinWorkQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, twin: &TwinId) -> Option<SlotRef> {
        read(&self.slots).get(twin).cloned()
    }

    fn slot_or_create(&self, twin: &TwinId) -> SlotRef {
        if let Some(slot) = self.slot(twin) {
            return slot;
        }
        write(&self.slots).entry(twin.clone()).or_default().clone()
    }

    /// Append `package` to the twin's queue, creating the queue if needed.
    ///
    /// Returns false if a package with the same identity is already queued
    /// for this twin.
    pub fn enqueue(&self, twin: &TwinId, package: StimulusPackage) -> bool {
        loop {
            let slot = self.slot_or_create(twin);
            let mut guard = lock(&slot);
            if guard.retired {
                // Lost a race with a dequeue that drained and detached this slot.
                continue;
            }
            if guard.packages.iter().any(|p| p.id == package.id) {
                debug!(%twin, package = %package.id, "package already queued; skipping");
                return false;
            }
            trace!(%twin, package = %package.id, depth = guard.packages.len() + 1, "package enqueued");
            guard.packages.push_back(package);
            return true;
        }
    }

    /// Pop the head package for `twin`. Drops the queue once it is empty.
    pub fn dequeue_next(&self, twin: &TwinId) -> Option<StimulusPackage> {
        let slot = self.slot(twin)?;
        let mut guard = lock(&slot);
        if guard.retired {
            return None;
        }
        let next = guard.packages.pop_front();
        if guard.packages.is_empty() {
            guard.retired = true;
            let mut slots = write(&self.slots);
            if slots.get(twin).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                slots.remove(twin);
            }
        }
        next
    }

    pub fn count(&self, twin: &TwinId) -> usize {
        match self.slot(twin) {
            Some(slot) => lock(&slot).packages.len(),
            None => 0,
        }
    }

    /// Snapshot of every twin currently holding queued work.
    pub fn twins_with_pending_work(&self) -> HashSet<TwinId> {
        let slots: Vec<(TwinId, SlotRef)> = read(&self.slots)
            .iter()
            .map(|(twin, slot)| (twin.clone(), slot.clone()))
            .collect();
        slots
            .into_iter()
            .filter(|(_, slot)| !lock(slot).packages.is_empty())
            .map(|(twin, _)| twin)
            .collect()
    }

    /// Total packages queued across all twins.
    pub fn total_queued(&self) -> usize {
        let slots: Vec<SlotRef> = read(&self.slots).values().cloned().collect();
        slots.iter().map(|slot| lock(slot).packages.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.slots).is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
