use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use twinpath_core::config::OrchestratorConfig;
use twinpath_core::types::{
    BehaviourId, EndpointRef, JobCard, Outcome, OutcomeSet, ParcelStatus, StimulusPackage,
    UnitOfWork,
};
use twinpath_core::{Delivery, DispatchSink, Orchestrator, PublishSink, TwinpathError};

use crate::output::{print_json, print_json_line, print_table};
use crate::scenario::{decompose, Scenario};

// ---------------------------------------------------------------------------
// In-process collaborators
// ---------------------------------------------------------------------------

struct Dispatched {
    behaviour: BehaviourId,
    package: StimulusPackage,
}

/// Hands dispatched packages to the simulated executor task.
struct ChannelDispatch {
    tx: mpsc::UnboundedSender<Dispatched>,
}

impl DispatchSink for ChannelDispatch {
    fn submit(&self, behaviour: &BehaviourId, endpoint: &EndpointRef, package: StimulusPackage) {
        debug!(%behaviour, %endpoint, twin = %package.target_twin, "simulated dispatch");
        let dispatched = Dispatched {
            behaviour: behaviour.clone(),
            package,
        };
        if self.tx.send(dispatched).is_err() {
            warn!(%behaviour, "executor stopped; dispatch dropped");
        }
    }
}

/// Streams published units of work back to the command loop for printing.
struct ChannelPublish {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl PublishSink for ChannelPublish {
    fn deliver(&self, delivery: Delivery) -> twinpath_core::Result<()> {
        self.tx
            .send(delivery)
            .map_err(|_| TwinpathError::Delivery("output closed".to_string()))
    }
}

/// Answers every dispatch after the behaviour's latency with one outcome
/// echoing the stimulus, or with an empty set for silent behaviours.
async fn run_executor(
    orch: Arc<Orchestrator>,
    mut rx: mpsc::UnboundedReceiver<Dispatched>,
    scenario: Arc<Scenario>,
) {
    while let Some(Dispatched { behaviour, package }) = rx.recv().await {
        let orch = Arc::clone(&orch);
        let (latency, edge, silent) = scenario
            .behaviour(&behaviour)
            .map(|s| (s.latency_ms, s.edge, s.silent))
            .unwrap_or_default();
        tokio::spawn(async move {
            if latency > 0 {
                tokio::time::sleep(Duration::from_millis(latency)).await;
            }
            let twin = package.target_twin.clone();
            let mut set = OutcomeSet::new(behaviour.clone(), twin.clone());
            if !silent {
                let result = json!({
                    "behaviour": behaviour,
                    "twin": twin,
                    "stimulus": package.stimulus.resource,
                });
                let mut outcome = Outcome::new(package.stimulus.id.clone(), result);
                if edge {
                    outcome = outcome.forwarded_to_edge();
                }
                set = set.with_outcome(outcome);
            }
            orch.register_completion(set);
        });
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Summary {
    published: usize,
    expected: usize,
    snapshot: twinpath_core::OrchestratorSnapshot,
}

fn table_row(delivery: &Delivery) -> Vec<String> {
    let destinations: Vec<&str> = delivery
        .uow
        .egress
        .iter()
        .filter_map(|p| p.destination.as_ref().map(|d| d.as_str()))
        .collect();
    vec![
        delivery.uow.id.to_string(),
        delivery.uow.outcome.to_string(),
        delivery.uow.egress.len().to_string(),
        if destinations.is_empty() {
            "-".to_string()
        } else {
            destinations.join(",")
        },
        delivery.source_key.to_string(),
        delivery
            .parcel_status
            .entry_date
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    ]
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    config: Option<&Path>,
    scenario_path: &Path,
    timeout_ms: u64,
    json: bool,
) -> anyhow::Result<()> {
    let cfg = super::config::load(config)?;
    cfg.ensure_valid().context("refusing to run with invalid config")?;
    let scenario = Scenario::load(scenario_path)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(simulate(cfg, scenario, Duration::from_millis(timeout_ms), json))
}

async fn simulate(
    cfg: OrchestratorConfig,
    scenario: Scenario,
    timeout: Duration,
    json: bool,
) -> anyhow::Result<()> {
    let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
    let (publish_tx, mut publish_rx) = mpsc::unbounded_channel();
    let orch = Arc::new(Orchestrator::new(
        Arc::new(ChannelDispatch { tx: dispatch_tx }),
        Arc::new(ChannelPublish { tx: publish_tx }),
    ));
    scenario.install(&orch);

    let scenario = Arc::new(scenario);
    let executor = tokio::spawn(run_executor(
        Arc::clone(&orch),
        dispatch_rx,
        Arc::clone(&scenario),
    ));

    let expected = scenario.uows.len();
    for spec in &scenario.uows {
        let uow = UnitOfWork::new(spec.id.clone(), spec.ingress.clone());
        let stimuli = decompose(&uow);
        orch.register_uow(
            uow.clone(),
            JobCard::executing(format!("simulate-{}", spec.id)),
            ParcelStatus::active(),
            spec.source.clone(),
        );
        let count = stimuli.len();
        let queued = orch.register_stimuli(stimuli);
        info!(uow = %spec.id, stimuli = count, queued, "unit of work registered");
        if orch.causality().entry_count(&uow.id) == 0 {
            warn!(uow = %spec.id, "no behaviour picked up this unit of work; publishing it unchanged");
            orch.aggregate_and_publish(&uow.id);
        }
    }

    let dispatcher = orch.spawn_dispatcher(&cfg.dispatch)?;

    let mut published: Vec<Delivery> = Vec::new();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    while published.len() < expected {
        tokio::select! {
            Some(delivery) = publish_rx.recv() => {
                if json {
                    print_json_line(&delivery)?;
                }
                published.push(delivery);
            }
            _ = &mut deadline => break,
        }
    }

    dispatcher.shutdown().await;
    executor.abort();

    let summary = Summary {
        published: published.len(),
        expected,
        snapshot: orch.snapshot(),
    };
    if json {
        print_json(&summary)?;
    } else {
        print_table(
            &["UOW", "OUTCOME", "EGRESS", "FORWARDED TO", "SOURCE", "PUBLISHED AT"],
            published.iter().map(table_row).collect(),
        );
    }

    if published.len() < expected {
        anyhow::bail!(
            "timed out after {} ms: {} of {} units of work published",
            timeout.as_millis(),
            published.len(),
            expected
        );
    }
    Ok(())
}
