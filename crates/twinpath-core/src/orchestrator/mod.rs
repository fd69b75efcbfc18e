//! Twin orchestrator: routes stimuli to twins, serializes each twin's work,
//! and publishes a UoW once all the work it spawned has finished.
//!
//! ```text
//!  register_uow ──► WorkCache
//!  register_stimulus ──► StimulusCache ──► inclusion/exclusion filters
//!                                              │ one package per (twin, behaviour)
//!                                              ▼
//!                         CausalityTracker ◄── TwinWorkQueues
//!                               ▲                   │ dispatch_tick (idle twins only)
//!                               │                   ▼
//!  register_completion ─────────┴── TwinBusyTable ──► DispatchSink
//!        │ last triple finished
//!        ▼
//!  aggregate_and_publish ──► PublishSink, then purge
//! ```
//!
//! Per-UoW lifecycle is implicit in cache membership:
//! `Received → Decomposed → Dispatching → Aggregating → Published`.

mod dispatch;
mod pipeline;

pub use dispatch::DispatcherHandle;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::debug;

use crate::busy::TwinBusyTable;
use crate::cache::{OutcomeCache, StimulusCache, WorkCache};
use crate::causality::CausalityTracker;
use crate::forwarders::ForwarderMap;
use crate::ports::{DispatchSink, ExclusionFilter, InclusionFilter, PublishSink};
use crate::queue::TwinWorkQueues;
use crate::sync::{read, write};
use crate::types::{BehaviourId, EndpointRef, ForwarderId, TwinId};

// ---------------------------------------------------------------------------
// Behaviour routing
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct BehaviourRoute {
    behaviour: BehaviourId,
    inclusion: Option<Arc<dyn InclusionFilter>>,
    exclusion: Option<Arc<dyn ExclusionFilter>>,
    endpoint: Option<EndpointRef>,
}

impl BehaviourRoute {
    fn new(behaviour: BehaviourId) -> Self {
        Self {
            behaviour,
            inclusion: None,
            exclusion: None,
            endpoint: None,
        }
    }
}

/// Routes kept in first-registration order.
#[derive(Default)]
struct Routing {
    routes: Vec<BehaviourRoute>,
}

impl Routing {
    fn route_mut(&mut self, behaviour: &BehaviourId) -> &mut BehaviourRoute {
        let idx = match self.routes.iter().position(|r| &r.behaviour == behaviour) {
            Some(idx) => idx,
            None => {
                self.routes.push(BehaviourRoute::new(behaviour.clone()));
                self.routes.len() - 1
            }
        };
        &mut self.routes[idx]
    }

    fn endpoint(&self, behaviour: &BehaviourId) -> Option<EndpointRef> {
        self.routes
            .iter()
            .find(|r| &r.behaviour == behaviour)
            .and_then(|r| r.endpoint.clone())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time sizes of every store, for operators and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorSnapshot {
    pub uows: usize,
    pub stimuli: usize,
    pub outcomes: usize,
    pub tracked_uows: usize,
    pub queued_packages: usize,
    pub busy_twins: usize,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Owns every in-flight store; share it across threads behind an `Arc`.
pub struct Orchestrator {
    work: WorkCache,
    stimuli: StimulusCache,
    outcomes: OutcomeCache,
    causality: CausalityTracker,
    queues: TwinWorkQueues,
    busy: TwinBusyTable,
    forwarders: ForwarderMap,
    routing: RwLock<Routing>,
    dispatch_sink: Arc<dyn DispatchSink>,
    publish_sink: Arc<dyn PublishSink>,
    dispatcher_running: AtomicBool,
}

impl Orchestrator {
    pub fn new(dispatch_sink: Arc<dyn DispatchSink>, publish_sink: Arc<dyn PublishSink>) -> Self {
        Self {
            work: WorkCache::new(),
            stimuli: StimulusCache::new(),
            outcomes: OutcomeCache::new(),
            causality: CausalityTracker::new(),
            queues: TwinWorkQueues::new(),
            busy: TwinBusyTable::new(),
            forwarders: ForwarderMap::new(),
            routing: RwLock::new(Routing::default()),
            dispatch_sink,
            publish_sink,
            dispatcher_running: AtomicBool::new(false),
        }
    }

    // -----------------------------------------------------------------------
    // Configuration-time registration
    // -----------------------------------------------------------------------

    /// Install (or replace) the inclusion filter for `behaviour`. Only
    /// behaviours with an inclusion filter take part in fan-out.
    pub fn register_inclusion_filter<F>(&self, behaviour: impl Into<BehaviourId>, filter: F)
    where
        F: InclusionFilter + 'static,
    {
        let behaviour = behaviour.into();
        debug!(%behaviour, "inclusion filter registered");
        write(&self.routing).route_mut(&behaviour).inclusion = Some(Arc::new(filter));
    }

    pub fn register_exclusion_filter<F>(&self, behaviour: impl Into<BehaviourId>, filter: F)
    where
        F: ExclusionFilter + 'static,
    {
        let behaviour = behaviour.into();
        debug!(%behaviour, "exclusion filter registered");
        write(&self.routing).route_mut(&behaviour).exclusion = Some(Arc::new(filter));
    }

    /// First registration wins; later ones for the same behaviour are ignored.
    pub fn register_behaviour_endpoint(
        &self,
        behaviour: impl Into<BehaviourId>,
        endpoint: impl Into<EndpointRef>,
    ) {
        let behaviour = behaviour.into();
        let endpoint = endpoint.into();
        let mut routing = write(&self.routing);
        let route = routing.route_mut(&behaviour);
        match &route.endpoint {
            Some(existing) => {
                debug!(%behaviour, %existing, ignored = %endpoint, "behaviour endpoint already registered");
            }
            None => {
                debug!(%behaviour, %endpoint, "behaviour endpoint registered");
                route.endpoint = Some(endpoint);
            }
        }
    }

    pub fn register_forwarder(&self, twin: impl Into<TwinId>, forwarder: impl Into<ForwarderId>) {
        self.forwarders.add(&twin.into(), &forwarder.into());
    }

    pub fn unregister_forwarder(&self, twin: impl Into<TwinId>, forwarder: impl Into<ForwarderId>) {
        self.forwarders.remove(&twin.into(), &forwarder.into());
    }

    fn routes(&self) -> Vec<BehaviourRoute> {
        read(&self.routing).routes.clone()
    }

    fn endpoint_for(&self, behaviour: &BehaviourId) -> Option<EndpointRef> {
        read(&self.routing).endpoint(behaviour)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_twin_busy(&self, twin: &TwinId) -> bool {
        self.busy.is_busy(twin)
    }

    pub fn twin_active_behaviour(&self, twin: &TwinId) -> Option<BehaviourId> {
        self.busy.active_behaviour(twin)
    }

    pub fn queued_for(&self, twin: &TwinId) -> usize {
        self.queues.count(twin)
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            uows: self.work.len(),
            stimuli: self.stimuli.len(),
            outcomes: self.outcomes.len(),
            tracked_uows: self.causality.tracked_uows(),
            queued_packages: self.queues.total_queued(),
            busy_twins: self.busy.len(),
        }
    }

    pub fn work_cache(&self) -> &WorkCache {
        &self.work
    }

    pub fn stimulus_cache(&self) -> &StimulusCache {
        &self.stimuli
    }

    pub fn outcome_cache(&self) -> &OutcomeCache {
        &self.outcomes
    }

    pub fn causality(&self) -> &CausalityTracker {
        &self.causality
    }
}
