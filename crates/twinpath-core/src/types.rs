use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identity of an ingested unit of work.
    UowId
);
string_id!(StimulusId);
string_id!(
    /// Identity of one digital-twin instance.
    TwinId
);
string_id!(BehaviourId);
string_id!(OutcomeId);
string_id!(
    /// Identity of an edge forwarder that relays outcomes to a twin's real-world counterpart.
    ForwarderId
);
string_id!(
    /// Opaque address of the executor that runs a behaviour.
    EndpointRef
);
string_id!(
    /// Key of the ingestion node a UoW arrived from; replies are routed back through it.
    SourceKey
);
string_id!(StimulusPackageId);

impl StimulusPackageId {
    /// Packages are identified by what they dispatch, so the same
    /// (stimulus, twin, behaviour) combination always yields the same id.
    ///
    /// The first two parts are length-prefixed, so ids that themselves
    /// contain the separator cannot make two triples collide.
    pub fn derive(stimulus: &StimulusId, twin: &TwinId, behaviour: &BehaviourId) -> Self {
        Self(format!(
            "{}:{stimulus}|{}:{twin}|{behaviour}",
            stimulus.as_str().len(),
            twin.as_str().len()
        ))
    }
}

impl OutcomeId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl StimulusId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// ---------------------------------------------------------------------------
// UnitOfWork
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingOutcome {
    #[default]
    NotStarted,
    Success,
    Incomplete,
    Failed,
}

impl ProcessingOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingOutcome::NotStarted => "not_started",
            ProcessingOutcome::Success => "success",
            ProcessingOutcome::Incomplete => "incomplete",
            ProcessingOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of a UoW's egress content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgressPayload {
    pub resource: serde_json::Value,
    /// Set when the payload is addressed to one specific edge forwarder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ForwarderId>,
}

impl EgressPayload {
    pub fn untagged(resource: serde_json::Value) -> Self {
        Self {
            resource,
            destination: None,
        }
    }

    pub fn for_destination(resource: serde_json::Value, destination: ForwarderId) -> Self {
        Self {
            resource,
            destination: Some(destination),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOfWork {
    pub id: UowId,
    pub ingress: serde_json::Value,
    #[serde(default)]
    pub egress: Vec<EgressPayload>,
    #[serde(default)]
    pub outcome: ProcessingOutcome,
}

impl UnitOfWork {
    pub fn new(id: impl Into<UowId>, ingress: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            ingress,
            egress: Vec::new(),
            outcome: ProcessingOutcome::NotStarted,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Waiting,
    Executing,
    Finished,
    Failed,
}

/// Job bookkeeping that travels with a UoW through the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCard {
    pub activity_id: String,
    pub current_status: ActivityStatus,
    pub requested_status: ActivityStatus,
}

impl JobCard {
    pub fn executing(activity_id: impl Into<String>) -> Self {
        Self {
            activity_id: activity_id.into(),
            current_status: ActivityStatus::Executing,
            requested_status: ActivityStatus::Executing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcelProcessingStatus {
    Registered,
    Active,
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelStatus {
    pub status: ParcelProcessingStatus,
    pub entry_date: DateTime<Utc>,
}

impl ParcelStatus {
    pub fn active() -> Self {
        Self {
            status: ParcelProcessingStatus::Active,
            entry_date: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stimulus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StimulusReasonKind {
    /// The UoW carried a single resource.
    Direct,
    /// The resource was one entry of a bundle.
    Bundle,
    /// The resource was one entry of a message bundle with source/destination headers.
    Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusReason {
    pub kind: StimulusReasonKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_destination: Option<String>,
}

/// A single domain event derived from a UoW. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    pub id: StimulusId,
    /// The UoW this stimulus was decomposed from, if any.
    #[serde(default)]
    pub uow: Option<UowId>,
    pub resource: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<StimulusReason>,
}

impl Stimulus {
    pub fn new(id: impl Into<StimulusId>, uow: impl Into<UowId>, resource: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            uow: Some(uow.into()),
            resource,
            created_at: Utc::now(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: StimulusReason) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// One queued (stimulus, twin, behaviour) dispatch unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusPackage {
    pub id: StimulusPackageId,
    pub target_twin: TwinId,
    pub target_behaviour: BehaviourId,
    pub stimulus: Arc<Stimulus>,
}

impl StimulusPackage {
    pub fn new(stimulus: Arc<Stimulus>, target_twin: TwinId, target_behaviour: BehaviourId) -> Self {
        Self {
            id: StimulusPackageId::derive(&stimulus.id, &target_twin, &target_behaviour),
            target_twin,
            target_behaviour,
            stimulus,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The result of one behaviour execution for one stimulus against one twin.
///
/// `source_behaviour` and `affecting_twin` may be left empty by executors;
/// they are back-filled from the enclosing [`OutcomeSet`] when the set is
/// registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: OutcomeId,
    #[serde(default)]
    pub source_behaviour: Option<BehaviourId>,
    pub source_stimulus: StimulusId,
    #[serde(default)]
    pub affecting_twin: Option<TwinId>,
    pub resource: serde_json::Value,
    /// Also forward the result to the twin's edge forwarders.
    #[serde(default)]
    pub forward_to_edge: bool,
}

impl Outcome {
    pub fn new(source_stimulus: impl Into<StimulusId>, resource: serde_json::Value) -> Self {
        Self {
            id: OutcomeId::generate(),
            source_behaviour: None,
            source_stimulus: source_stimulus.into(),
            affecting_twin: None,
            resource,
            forward_to_edge: false,
        }
    }

    pub fn forwarded_to_edge(mut self) -> Self {
        self.forward_to_edge = true;
        self
    }
}

/// Everything one behaviour invocation produced for one twin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSet {
    pub source_behaviour: BehaviourId,
    pub source_twin: TwinId,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

impl OutcomeSet {
    pub fn new(source_behaviour: impl Into<BehaviourId>, source_twin: impl Into<TwinId>) -> Self {
        Self {
            source_behaviour: source_behaviour.into(),
            source_twin: source_twin.into(),
            outcomes: Vec::new(),
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcomes.push(outcome);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
