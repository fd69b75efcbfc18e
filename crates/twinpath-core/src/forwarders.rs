//! Edge forwarders registered per twin.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use tracing::{debug, trace};

use crate::sync::{read, write};
use crate::types::{ForwarderId, TwinId};

#[derive(Debug, Default)]
pub struct ForwarderMap {
    by_twin: RwLock<HashMap<TwinId, BTreeSet<ForwarderId>>>,
}

impl ForwarderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, twin: &TwinId, forwarder: &ForwarderId) {
        let added = write(&self.by_twin)
            .entry(twin.clone())
            .or_default()
            .insert(forwarder.clone());
        trace!(%twin, %forwarder, added, "forwarder associated");
    }

    pub fn remove(&self, twin: &TwinId, forwarder: &ForwarderId) {
        let mut by_twin = write(&self.by_twin);
        let Some(set) = by_twin.get_mut(twin) else {
            debug!(%twin, "remove forwarder: twin has no forwarders");
            return;
        };
        set.remove(forwarder);
        if set.is_empty() {
            by_twin.remove(twin);
        }
    }

    /// Snapshot of the twin's forwarders, in stable order. Empty if none.
    pub fn get(&self, twin: &TwinId) -> BTreeSet<ForwarderId> {
        read(&self.by_twin).get(twin).cloned().unwrap_or_default()
    }
}
