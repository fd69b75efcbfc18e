//! Contracts the orchestrator calls out through.
//!
//! Filters decide routing, the dispatch sink hands packages to whatever runs
//! behaviours, and the publish sink takes finished UoWs back to the
//! transport. None of them may block for long: they are invoked from
//! registration calls and from the dispatch loop.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{
    BehaviourId, EndpointRef, JobCard, ParcelStatus, SourceKey, Stimulus, StimulusPackage, TwinId,
    UnitOfWork,
};

/// Nominates the twins a behaviour should run against for a stimulus.
pub trait InclusionFilter: Send + Sync {
    fn candidate_twins(&self, stimulus: &Stimulus) -> Vec<TwinId>;
}

/// Vetoes individual (stimulus, twin) pairs nominated by the inclusion filter.
pub trait ExclusionFilter: Send + Sync {
    fn is_blocked(&self, stimulus: &Stimulus, twin: &TwinId) -> bool;
}

impl<F> InclusionFilter for F
where
    F: Fn(&Stimulus) -> Vec<TwinId> + Send + Sync,
{
    fn candidate_twins(&self, stimulus: &Stimulus) -> Vec<TwinId> {
        self(stimulus)
    }
}

impl<F> ExclusionFilter for F
where
    F: Fn(&Stimulus, &TwinId) -> bool + Send + Sync,
{
    fn is_blocked(&self, stimulus: &Stimulus, twin: &TwinId) -> bool {
        self(stimulus, twin)
    }
}

/// Fire-and-forget hand-off of one package to a behaviour executor.
///
/// Completion comes back only through
/// [`Orchestrator::register_completion`](crate::Orchestrator::register_completion).
pub trait DispatchSink: Send + Sync {
    fn submit(&self, behaviour: &BehaviourId, endpoint: &EndpointRef, package: StimulusPackage);
}

/// A finished UoW with its updated transport metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub uow: UnitOfWork,
    pub job_card: JobCard,
    pub parcel_status: ParcelStatus,
    pub source_key: SourceKey,
}

/// Takes published UoWs to their destination.
///
/// Returning an error does not make the orchestrator retry. The error is
/// logged and the UoW's state is reclaimed as if delivery had succeeded.
pub trait PublishSink: Send + Sync {
    fn deliver(&self, delivery: Delivery) -> Result<()>;
}
