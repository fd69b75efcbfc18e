use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use twinpath_core::causality::CausalStatus;
use twinpath_core::types::{
    ActivityStatus, BehaviourId, EndpointRef, JobCard, Outcome, OutcomeSet, ParcelProcessingStatus,
    ParcelStatus, ProcessingOutcome, Stimulus, StimulusPackage, TwinId, UnitOfWork, UowId,
};
use twinpath_core::{
    Delivery, DispatchConfig, DispatchSink, Orchestrator, OrchestratorSnapshot, PublishSink,
    TwinpathError,
};

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingDispatch {
    submitted: Mutex<Vec<StimulusPackage>>,
}

impl RecordingDispatch {
    fn take(&self) -> Vec<StimulusPackage> {
        std::mem::take(&mut *self.submitted.lock().unwrap())
    }
}

impl DispatchSink for RecordingDispatch {
    fn submit(&self, _: &BehaviourId, _: &EndpointRef, package: StimulusPackage) {
        self.submitted.lock().unwrap().push(package);
    }
}

#[derive(Default)]
struct RecordingPublish {
    delivered: Mutex<Vec<Delivery>>,
    fail: bool,
}

impl RecordingPublish {
    fn failing() -> Self {
        Self {
            delivered: Mutex::default(),
            fail: true,
        }
    }

    fn delivered(&self) -> Vec<Delivery> {
        self.delivered.lock().unwrap().clone()
    }
}

impl PublishSink for RecordingPublish {
    fn deliver(&self, delivery: Delivery) -> twinpath_core::Result<()> {
        self.delivered.lock().unwrap().push(delivery);
        if self.fail {
            return Err(TwinpathError::Delivery("transport offline".into()));
        }
        Ok(())
    }
}

struct Harness {
    orch: Arc<Orchestrator>,
    dispatch: Arc<RecordingDispatch>,
    publish: Arc<RecordingPublish>,
}

fn harness_with(publish: RecordingPublish) -> Harness {
    let dispatch = Arc::new(RecordingDispatch::default());
    let publish = Arc::new(publish);
    let orch = Arc::new(Orchestrator::new(dispatch.clone(), publish.clone()));
    orch.register_behaviour_endpoint("b1", "exec://b1");
    orch.register_behaviour_endpoint("b2", "exec://b2");
    Harness {
        orch,
        dispatch,
        publish,
    }
}

fn harness() -> Harness {
    harness_with(RecordingPublish::default())
}

fn include(twins: &'static [&'static str]) -> impl Fn(&Stimulus) -> Vec<TwinId> + Send + Sync {
    move |_: &Stimulus| twins.iter().map(|t| TwinId::from(*t)).collect()
}

fn register_uow(orch: &Orchestrator, id: &str) {
    orch.register_uow(
        UnitOfWork::new(id, json!({"resourceType": "Observation"})),
        JobCard::executing(format!("job-{id}")),
        ParcelStatus::active(),
        "ingest-1",
    );
}

fn complete(orch: &Orchestrator, package: &StimulusPackage, result: serde_json::Value) -> Vec<UowId> {
    orch.register_completion(
        OutcomeSet::new(package.target_behaviour.clone(), package.target_twin.clone())
            .with_outcome(Outcome::new(package.stimulus.id.clone(), result)),
    )
}

fn status(orch: &Orchestrator, b: &str, t: &str, s: &str, u: &str) -> Option<CausalStatus> {
    orch.causality()
        .status(&b.into(), &t.into(), &s.into(), &u.into())
}

// ---------------------------------------------------------------------------
// Scenario A: single twin, single behaviour
// ---------------------------------------------------------------------------

#[test]
fn single_twin_round_trip_publishes_and_purges() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    register_uow(&h.orch, "u1");

    assert_eq!(h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({"v": 1}))), 1);
    assert_eq!(h.orch.queued_for(&"t1".into()), 1);
    assert_eq!(status(&h.orch, "b1", "t1", "s1", "u1"), Some(CausalStatus::Queued));

    assert_eq!(h.orch.dispatch_tick(), 1);
    assert!(h.orch.is_twin_busy(&"t1".into()));
    assert_eq!(h.orch.queued_for(&"t1".into()), 0);

    let submitted = h.dispatch.take();
    assert_eq!(submitted.len(), 1);
    let published = complete(&h.orch, &submitted[0], json!({"score": 7}));

    assert_eq!(published, vec![UowId::from("u1")]);
    assert!(!h.orch.is_twin_busy(&"t1".into()));

    let delivered = h.publish.delivered();
    assert_eq!(delivered.len(), 1);
    let d = &delivered[0];
    assert_eq!(d.uow.outcome, ProcessingOutcome::Success);
    assert_eq!(d.uow.egress.len(), 1);
    assert_eq!(d.uow.egress[0].resource, json!({"score": 7}));
    assert!(d.uow.egress[0].destination.is_none());
    assert_eq!(d.job_card.current_status, ActivityStatus::Finished);
    assert_eq!(d.parcel_status.status, ParcelProcessingStatus::Finished);

    // Everything held for u1 is gone.
    let snap = h.orch.snapshot();
    assert_eq!(snap, Default::default());
    assert!(h.orch.stimulus_cache().get_for_uow(&"u1".into()).is_empty());
    assert!(!h.orch.causality().is_tracked(&"u1".into()));
}

// ---------------------------------------------------------------------------
// Scenario B: one stimulus, two twins
// ---------------------------------------------------------------------------

#[test]
fn uow_waits_for_every_twin() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1", "t2"]));
    register_uow(&h.orch, "u1");

    assert_eq!(h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({}))), 2);
    assert_eq!(h.orch.dispatch_tick(), 2);
    let mut submitted = h.dispatch.take();
    submitted.sort_by(|a, b| a.target_twin.cmp(&b.target_twin));

    assert!(complete(&h.orch, &submitted[0], json!("from-t1")).is_empty());
    assert!(!h.orch.causality().is_fully_finished(&"u1".into()));
    assert!(h.publish.delivered().is_empty());

    assert_eq!(complete(&h.orch, &submitted[1], json!("from-t2")), vec![UowId::from("u1")]);
    let delivered = h.publish.delivered();
    assert_eq!(delivered.len(), 1);
    let mut egress: Vec<_> = delivered[0].uow.egress.iter().map(|p| p.resource.clone()).collect();
    egress.sort_by_key(|v| v.to_string());
    assert_eq!(egress, vec![json!("from-t1"), json!("from-t2")]);
}

// ---------------------------------------------------------------------------
// Scenario C: exclusion veto
// ---------------------------------------------------------------------------

#[test]
fn exclusion_filter_vetoes_one_twin() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1", "t2"]));
    h.orch
        .register_exclusion_filter("b1", |_: &Stimulus, twin: &TwinId| twin.as_str() == "t2");
    register_uow(&h.orch, "u1");

    assert_eq!(h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({}))), 1);
    assert_eq!(h.orch.queued_for(&"t1".into()), 1);
    assert_eq!(h.orch.queued_for(&"t2".into()), 0);
    assert_eq!(status(&h.orch, "b1", "t2", "s1", "u1"), None);
}

#[test]
fn exclusion_applies_only_to_its_behaviour() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    h.orch.register_inclusion_filter("b2", include(&["t1"]));
    h.orch.register_exclusion_filter("b2", |_: &Stimulus, _: &TwinId| true);

    assert_eq!(h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({}))), 1);
    assert_eq!(status(&h.orch, "b1", "t1", "s1", "u1"), Some(CausalStatus::Queued));
    assert_eq!(status(&h.orch, "b2", "t1", "s1", "u1"), None);
}

// ---------------------------------------------------------------------------
// Scenario D: busy twin holds later work
// ---------------------------------------------------------------------------

#[test]
fn busy_twin_keeps_second_package_queued() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    register_uow(&h.orch, "u1");
    register_uow(&h.orch, "u2");

    h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({})));
    assert_eq!(h.orch.dispatch_tick(), 1);
    h.orch.register_stimulus(Stimulus::new("s2", "u2", json!({})));

    // Any number of ticks while t1 is busy dispatch nothing.
    for _ in 0..3 {
        assert_eq!(h.orch.dispatch_tick(), 0);
    }
    assert_eq!(h.orch.queued_for(&"t1".into()), 1);

    let first = h.dispatch.take();
    assert_eq!(first[0].stimulus.id.as_str(), "s1");
    complete(&h.orch, &first[0], json!({}));

    assert_eq!(h.orch.dispatch_tick(), 1);
    let second = h.dispatch.take();
    assert_eq!(second[0].stimulus.id.as_str(), "s2");
    assert_eq!(h.orch.twin_active_behaviour(&"t1".into()), Some("b1".into()));
}

#[test]
fn two_behaviours_on_one_twin_run_one_at_a_time() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    h.orch.register_inclusion_filter("b2", include(&["t1"]));
    register_uow(&h.orch, "u1");

    assert_eq!(h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({}))), 2);

    assert_eq!(h.orch.dispatch_tick(), 1);
    let first = h.dispatch.take();
    assert_eq!(first[0].target_behaviour.as_str(), "b1");
    assert!(complete(&h.orch, &first[0], json!(1)).is_empty());

    assert_eq!(h.orch.dispatch_tick(), 1);
    let second = h.dispatch.take();
    assert_eq!(second[0].target_behaviour.as_str(), "b2");
    assert_eq!(complete(&h.orch, &second[0], json!(2)), vec![UowId::from("u1")]);
    assert_eq!(h.publish.delivered()[0].uow.egress.len(), 2);
}

// ---------------------------------------------------------------------------
// Fan-out details
// ---------------------------------------------------------------------------

#[test]
fn re_registering_a_stimulus_does_not_double_queue() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    let s = Stimulus::new("s1", "u1", json!({}));
    assert_eq!(h.orch.register_stimulus(s.clone()), 1);
    assert_eq!(h.orch.register_stimulus(s), 0);
    assert_eq!(h.orch.queued_for(&"t1".into()), 1);
}

#[test]
fn no_matching_twin_queues_nothing() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&[]));
    assert_eq!(h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({}))), 0);
    assert_eq!(h.orch.snapshot().queued_packages, 0);
    assert_eq!(h.orch.snapshot().stimuli, 1);
}

#[test]
fn batch_registration_tracks_all_stimuli_before_dispatch() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", |s: &Stimulus| {
        if s.id.as_str() == "s1" {
            vec![TwinId::from("t1")]
        } else {
            vec![TwinId::from("t2")]
        }
    });
    register_uow(&h.orch, "u1");

    let queued = h.orch.register_stimuli([
        Stimulus::new("s1", "u1", json!({})),
        Stimulus::new("s2", "u1", json!({})),
    ]);
    assert_eq!(queued, 2);
    assert_eq!(h.orch.causality().entry_count(&"u1".into()), 2);

    h.orch.dispatch_tick();
    let submitted = h.dispatch.take();
    let s1 = submitted
        .iter()
        .find(|p| p.stimulus.id.as_str() == "s1")
        .unwrap();
    assert!(complete(&h.orch, s1, json!({})).is_empty());
    assert!(h.publish.delivered().is_empty());
}

#[test]
fn stimulus_without_uow_is_dispatched_but_never_published() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    let mut s = Stimulus::new("s1", "unused", json!({}));
    s.uow = None;

    assert_eq!(h.orch.register_stimulus(s), 1);
    assert_eq!(h.orch.snapshot().tracked_uows, 0);
    h.orch.dispatch_tick();
    let submitted = h.dispatch.take();
    assert!(complete(&h.orch, &submitted[0], json!({})).is_empty());
    assert!(!h.orch.is_twin_busy(&"t1".into()));
    assert!(h.publish.delivered().is_empty());
}

// ---------------------------------------------------------------------------
// Completion edge cases
// ---------------------------------------------------------------------------

#[test]
fn empty_outcome_set_unlocks_twin_but_uow_never_completes() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    register_uow(&h.orch, "u1");
    h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({})));
    h.orch.dispatch_tick();
    assert!(h.orch.is_twin_busy(&"t1".into()));

    let published = h.orch.register_completion(OutcomeSet::new("b1", "t1"));

    assert!(published.is_empty());
    assert!(!h.orch.is_twin_busy(&"t1".into()));
    assert_eq!(status(&h.orch, "b1", "t1", "s1", "u1"), Some(CausalStatus::Queued));
    assert!(!h.orch.causality().is_fully_finished(&"u1".into()));
    assert!(h.publish.delivered().is_empty());
    assert_eq!(h.orch.snapshot().uows, 1);
}

#[test]
fn completion_for_idle_twin_still_records_outcomes() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    register_uow(&h.orch, "u1");
    h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({})));

    // Executor reports before the dispatcher ever ran.
    let set = OutcomeSet::new("b1", "t1").with_outcome(Outcome::new("s1", json!("early")));
    assert_eq!(h.orch.register_completion(set), vec![UowId::from("u1")]);
    assert_eq!(h.publish.delivered().len(), 1);
}

#[test]
fn late_duplicate_completion_does_not_republish() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    register_uow(&h.orch, "u1");
    h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({})));
    h.orch.dispatch_tick();
    let submitted = h.dispatch.take();

    complete(&h.orch, &submitted[0], json!(1));
    assert!(complete(&h.orch, &submitted[0], json!(1)).is_empty());
    assert_eq!(h.publish.delivered().len(), 1);
    assert_eq!(h.orch.snapshot(), OrchestratorSnapshot::default());
}

#[test]
fn concurrent_completions_publish_exactly_once() {
    let h = harness();
    let twins: Vec<String> = (0..16).map(|i| format!("t{i}")).collect();
    let candidates: Vec<TwinId> = twins.iter().map(|t| TwinId::from(t.as_str())).collect();
    h.orch
        .register_inclusion_filter("b1", move |_: &Stimulus| candidates.clone());
    register_uow(&h.orch, "u1");
    h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({})));
    assert_eq!(h.orch.dispatch_tick(), 16);

    let handles: Vec<_> = h
        .dispatch
        .take()
        .into_iter()
        .map(|package| {
            let orch = Arc::clone(&h.orch);
            std::thread::spawn(move || complete(&orch, &package, json!({})))
        })
        .collect();
    let published: usize = handles.into_iter().map(|j| j.join().unwrap().len()).sum();

    assert_eq!(published, 1);
    let delivered = h.publish.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].uow.egress.len(), 16);
    assert_eq!(h.orch.snapshot().busy_twins, 0);
}

// ---------------------------------------------------------------------------
// Publication
// ---------------------------------------------------------------------------

#[test]
fn edge_outcomes_are_copied_per_forwarder() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    h.orch.register_forwarder("t1", "edge-a");
    h.orch.register_forwarder("t1", "edge-b");
    h.orch.register_forwarder("t1", "edge-c");
    h.orch.unregister_forwarder("t1", "edge-c");
    register_uow(&h.orch, "u1");
    h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({})));
    h.orch.dispatch_tick();
    let package = h.dispatch.take().remove(0);

    let set = OutcomeSet::new("b1", "t1")
        .with_outcome(Outcome::new("s1", json!({"alert": true})).forwarded_to_edge());
    h.orch.register_completion(set);

    let egress = &h.publish.delivered()[0].uow.egress;
    let destinations: Vec<&str> = egress
        .iter()
        .filter_map(|p| p.destination.as_ref().map(|d| d.as_str()))
        .collect();
    assert_eq!(destinations, vec!["edge-a", "edge-b"]);
    assert!(egress.iter().all(|p| p.resource == json!({"alert": true})));
    assert_eq!(package.target_twin.as_str(), "t1");
}

#[test]
fn failed_delivery_still_purges_everything() {
    let h = harness_with(RecordingPublish::failing());
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    register_uow(&h.orch, "u1");
    h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({})));
    h.orch.dispatch_tick();
    let package = h.dispatch.take().remove(0);

    assert_eq!(complete(&h.orch, &package, json!({})), vec![UowId::from("u1")]);
    assert_eq!(h.publish.delivered().len(), 1);
    assert_eq!(h.orch.snapshot(), Default::default());
}

#[test]
fn unrelated_uows_are_left_alone_by_purge() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1", "t2"]));
    register_uow(&h.orch, "u1");
    register_uow(&h.orch, "u2");
    h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({})));
    h.orch.register_stimulus(Stimulus::new("s2", "u2", json!({})));

    h.orch.dispatch_tick();
    let first_round = h.dispatch.take();
    for package in &first_round {
        complete(&h.orch, package, json!({}));
    }
    h.orch.dispatch_tick();
    for package in &h.dispatch.take() {
        complete(&h.orch, package, json!({}));
    }

    let mut published: Vec<String> = h
        .publish
        .delivered()
        .iter()
        .map(|d| d.uow.id.to_string())
        .collect();
    published.sort();
    assert_eq!(published, vec!["u1", "u2"]);
    assert_eq!(h.orch.snapshot(), Default::default());
}

// ---------------------------------------------------------------------------
// Dispatcher loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatcher_loop_drives_uow_to_publication() {
    let h = harness();
    h.orch.register_inclusion_filter("b1", include(&["t1"]));
    register_uow(&h.orch, "u1");
    register_uow(&h.orch, "u2");
    h.orch.register_stimulus(Stimulus::new("s1", "u1", json!({})));
    h.orch.register_stimulus(Stimulus::new("s2", "u2", json!({})));

    let handle = h
        .orch
        .spawn_dispatcher(&DispatchConfig {
            initial_delay_ms: 1,
            period_ms: 2,
        })
        .unwrap();

    for _ in 0..500 {
        for package in h.dispatch.take() {
            complete(&h.orch, &package, json!({}));
        }
        if h.publish.delivered().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    handle.shutdown().await;

    let order: Vec<String> = h
        .publish
        .delivered()
        .iter()
        .map(|d| d.uow.id.to_string())
        .collect();
    assert_eq!(order, vec!["u1", "u2"]);
}
