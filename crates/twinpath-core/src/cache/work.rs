//! In-flight units of work and the transport metadata that travels with them.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::sync::{read, write};
use crate::types::{JobCard, ParcelStatus, SourceKey, UnitOfWork, UowId};

/// Everything stored for one UoW. Inserted and removed as a unit so readers
/// never see a UoW without its metadata.
#[derive(Debug, Clone)]
pub struct WorkEntry {
    pub uow: UnitOfWork,
    pub job_card: JobCard,
    pub parcel_status: ParcelStatus,
    pub source_key: SourceKey,
}

#[derive(Debug, Default)]
pub struct WorkCache {
    entries: RwLock<HashMap<UowId, WorkEntry>>,
}

impl WorkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Re-registering the same identity overwrites every field.
    pub fn put(
        &self,
        uow: UnitOfWork,
        job_card: JobCard,
        parcel_status: ParcelStatus,
        source_key: SourceKey,
    ) {
        let id = uow.id.clone();
        let replaced = write(&self.entries)
            .insert(
                id.clone(),
                WorkEntry {
                    uow,
                    job_card,
                    parcel_status,
                    source_key,
                },
            )
            .is_some();
        debug!(uow = %id, replaced, "work cache put");
    }

    pub fn get(&self, id: &UowId) -> Option<UnitOfWork> {
        read(&self.entries).get(id).map(|e| e.uow.clone())
    }

    pub fn job_card(&self, id: &UowId) -> Option<JobCard> {
        read(&self.entries).get(id).map(|e| e.job_card.clone())
    }

    pub fn parcel_status(&self, id: &UowId) -> Option<ParcelStatus> {
        read(&self.entries).get(id).map(|e| e.parcel_status.clone())
    }

    pub fn source_key(&self, id: &UowId) -> Option<SourceKey> {
        read(&self.entries).get(id).map(|e| e.source_key.clone())
    }

    /// Snapshot of the full entry (UoW plus metadata) in one read.
    pub fn entry(&self, id: &UowId) -> Option<WorkEntry> {
        read(&self.entries).get(id).cloned()
    }

    pub fn remove(&self, id: &UowId) -> Option<WorkEntry> {
        let removed = write(&self.entries).remove(id);
        if removed.is_none() {
            debug!(uow = %id, "work cache remove: not present");
        }
        removed
    }

    pub fn contains(&self, id: &UowId) -> bool {
        read(&self.entries).contains_key(id)
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.entries).is_empty()
    }
}
