//! Scenario files for `twinpath simulate`.
//!
//! ```yaml
//! behaviours:
//!   - id: vitals-monitor
//!     endpoint: local://vitals
//!     twins: [patient-1, patient-2]
//!     exclude: [patient-2]
//!     resource_type: Observation
//!     edge: true
//!     latency_ms: 20
//! forwarders:
//!   patient-1: [ward-3-display]
//! uows:
//!   - id: uow-1
//!     source: ingest-a
//!     ingress: { resourceType: Observation, id: obs-1 }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use twinpath_core::types::{
    BehaviourId, EndpointRef, SourceKey, Stimulus, StimulusId, StimulusReason, StimulusReasonKind,
    TwinId, UnitOfWork, UowId,
};
use twinpath_core::Orchestrator;

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub behaviours: Vec<BehaviourSpec>,
    /// Twin id to the edge forwarders that relay its outcomes.
    #[serde(default)]
    pub forwarders: BTreeMap<TwinId, Vec<String>>,
    pub uows: Vec<UowSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviourSpec {
    pub id: BehaviourId,
    pub endpoint: EndpointRef,
    /// Twins this behaviour runs against.
    #[serde(default)]
    pub twins: Vec<TwinId>,
    #[serde(default)]
    pub exclude: Vec<TwinId>,
    /// Only stimuli whose resource has this `resourceType` are routed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Flag produced outcomes for edge forwarding.
    #[serde(default)]
    pub edge: bool,
    #[serde(default)]
    pub latency_ms: u64,
    /// Report completion with no outcomes.
    #[serde(default)]
    pub silent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UowSpec {
    pub id: UowId,
    #[serde(default = "default_source")]
    pub source: SourceKey,
    pub ingress: Value,
}

fn default_source() -> SourceKey {
    SourceKey::from("scenario")
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_yaml(&data).with_context(|| format!("invalid scenario {}", path.display()))
    }

    pub fn from_yaml(data: &str) -> anyhow::Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(data)?;
        scenario.check()?;
        Ok(scenario)
    }

    fn check(&self) -> anyhow::Result<()> {
        let mut behaviours = HashSet::new();
        for b in &self.behaviours {
            if !behaviours.insert(&b.id) {
                anyhow::bail!("behaviour '{}' is defined more than once", b.id);
            }
        }
        let mut uows = HashSet::new();
        for u in &self.uows {
            if !uows.insert(&u.id) {
                anyhow::bail!("unit of work '{}' is defined more than once", u.id);
            }
        }
        Ok(())
    }

    pub fn behaviour(&self, id: &BehaviourId) -> Option<&BehaviourSpec> {
        self.behaviours.iter().find(|b| &b.id == id)
    }

    /// Register filters, endpoints and forwarders for every behaviour.
    pub fn install(&self, orch: &Orchestrator) {
        for spec in &self.behaviours {
            let twins = spec.twins.clone();
            let resource_type = spec.resource_type.clone();
            orch.register_inclusion_filter(spec.id.clone(), move |stimulus: &Stimulus| {
                match &resource_type {
                    Some(wanted) if resource_type_of(&stimulus.resource) != Some(wanted.as_str()) => {
                        Vec::new()
                    }
                    _ => twins.clone(),
                }
            });
            if !spec.exclude.is_empty() {
                let excluded: HashSet<TwinId> = spec.exclude.iter().cloned().collect();
                orch.register_exclusion_filter(spec.id.clone(), move |_: &Stimulus, twin: &TwinId| {
                    excluded.contains(twin)
                });
            }
            orch.register_behaviour_endpoint(spec.id.clone(), spec.endpoint.clone());
        }
        for (twin, forwarders) in &self.forwarders {
            for forwarder in forwarders {
                orch.register_forwarder(twin.clone(), forwarder.as_str());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Decomposition
// ---------------------------------------------------------------------------

fn resource_type_of(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

/// Split a UoW's ingress into stimuli.
///
/// A `Bundle` yields one stimulus per entry. A `message` bundle records the
/// MessageHeader's source and first destination on every stimulus, and yields
/// nothing if it carries no header. Anything else is a single stimulus.
pub fn decompose(uow: &UnitOfWork) -> Vec<Stimulus> {
    let ingress = &uow.ingress;
    if resource_type_of(ingress) != Some("Bundle") {
        return vec![Stimulus::new(StimulusId::generate(), uow.id.clone(), ingress.clone())
            .with_reason(StimulusReason {
                kind: StimulusReasonKind::Direct,
                original_source: None,
                original_destination: None,
            })];
    }

    let entries: Vec<&Value> = ingress
        .get("entry")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(|e| e.get("resource")).collect())
        .unwrap_or_default();

    let mut reason = StimulusReason {
        kind: StimulusReasonKind::Bundle,
        original_source: None,
        original_destination: None,
    };
    if ingress.get("type").and_then(Value::as_str) == Some("message") {
        let Some(header) = entries
            .iter()
            .find(|r| resource_type_of(r) == Some("MessageHeader"))
        else {
            debug!(uow = %uow.id, "message bundle without MessageHeader; no stimuli");
            return Vec::new();
        };
        reason.kind = StimulusReasonKind::Message;
        reason.original_source = header
            .pointer("/source/software")
            .and_then(Value::as_str)
            .map(str::to_string);
        reason.original_destination = header
            .pointer("/destination/0/target/display")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    entries
        .into_iter()
        .map(|resource| {
            Stimulus::new(StimulusId::generate(), uow.id.clone(), resource.clone())
                .with_reason(reason.clone())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
