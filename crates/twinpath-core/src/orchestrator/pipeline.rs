use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::Orchestrator;
use crate::causality::CausalStatus;
use crate::ports::Delivery;
use crate::types::{
    ActivityStatus, EgressPayload, JobCard, Outcome, OutcomeSet, ParcelProcessingStatus,
    ParcelStatus, ProcessingOutcome, SourceKey, Stimulus, StimulusPackage, UnitOfWork, UowId,
};

impl Orchestrator {
    // -----------------------------------------------------------------------
    // Stage 1: ingestion
    // -----------------------------------------------------------------------

    /// Store a UoW and its transport metadata. Re-registering the same id
    /// overwrites the previous entry.
    pub fn register_uow(
        &self,
        uow: UnitOfWork,
        job_card: JobCard,
        parcel_status: ParcelStatus,
        source_key: impl Into<SourceKey>,
    ) {
        self.work.put(uow, job_card, parcel_status, source_key.into());
    }

    // -----------------------------------------------------------------------
    // Stage 2/3: decomposition and fan-out
    // -----------------------------------------------------------------------

    /// Cache `stimulus` and enqueue one package per (twin, behaviour) pair the
    /// filters select. Returns how many packages were newly queued.
    pub fn register_stimulus(&self, stimulus: Stimulus) -> usize {
        self.register_stimuli([stimulus])
    }

    /// Like [`register_stimulus`](Self::register_stimulus) for several
    /// stimuli at once.
    ///
    /// Every causality entry for the batch is recorded before the first
    /// package becomes visible to the dispatcher, so a UoW split into several
    /// stimuli cannot be seen as finished while its later stimuli are still
    /// being routed.
    pub fn register_stimuli(&self, stimuli: impl IntoIterator<Item = Stimulus>) -> usize {
        let mut packages = Vec::new();
        for stimulus in stimuli {
            let stimulus = Arc::new(stimulus);
            self.stimuli.add(Arc::clone(&stimulus));
            packages.extend(self.fan_out(&stimulus));
        }

        for package in &packages {
            let Some(uow) = package.stimulus.uow.as_ref() else {
                debug!(stimulus = %package.stimulus.id, "stimulus has no uow; not tracked for completion");
                continue;
            };
            self.causality.ensure_behaviour_under_twin(
                &package.target_behaviour,
                &package.target_twin,
                &package.stimulus.id,
                uow,
            );
        }

        let mut queued = 0;
        for package in packages {
            let twin = package.target_twin.clone();
            if self.queues.enqueue(&twin, package) {
                queued += 1;
            }
        }
        queued
    }

    fn fan_out(&self, stimulus: &Arc<Stimulus>) -> Vec<StimulusPackage> {
        let mut packages = Vec::new();
        for route in self.routes() {
            let Some(inclusion) = &route.inclusion else {
                continue;
            };
            for twin in inclusion.candidate_twins(stimulus) {
                if let Some(exclusion) = &route.exclusion {
                    if exclusion.is_blocked(stimulus, &twin) {
                        debug!(stimulus = %stimulus.id, %twin, behaviour = %route.behaviour, "excluded");
                        continue;
                    }
                }
                packages.push(StimulusPackage::new(
                    Arc::clone(stimulus),
                    twin,
                    route.behaviour.clone(),
                ));
            }
        }
        if packages.is_empty() {
            debug!(stimulus = %stimulus.id, "no behaviour selected any twin");
        }
        packages
    }

    // -----------------------------------------------------------------------
    // Stage 6/7: completion
    // -----------------------------------------------------------------------

    /// Record what one behaviour invocation produced.
    ///
    /// The source twin is always released, even for an empty set. An empty
    /// set advances no causality entry, so the UoW that spawned the invocation
    /// stays incomplete. Returns the UoWs this call aggregated and published.
    pub fn register_completion(&self, set: OutcomeSet) -> Vec<UowId> {
        let twin = set.source_twin.clone();
        let released = self.busy.unlock(&twin);
        debug!(%twin, behaviour = %set.source_behaviour, released = released.is_some(), outcomes = set.outcomes.len(), "completion received");

        if set.outcomes.is_empty() {
            return Vec::new();
        }

        // Outcomes for a stimulus that is no longer cached (a late or repeated
        // callback after its UoW was published) would never be aggregated.
        let OutcomeSet {
            source_behaviour,
            source_twin,
            outcomes,
        } = set;
        let known: Vec<Outcome> = outcomes
            .into_iter()
            .filter(|outcome| {
                let cached = self.stimuli.get(&outcome.source_stimulus).is_some();
                if !cached {
                    debug!(outcome = %outcome.id, stimulus = %outcome.source_stimulus, "outcome for unknown stimulus; dropped");
                }
                cached
            })
            .collect();
        if known.is_empty() {
            return Vec::new();
        }

        let stored = self.outcomes.add_set(OutcomeSet {
            source_behaviour,
            source_twin,
            outcomes: known,
        });
        let mut touched: Vec<UowId> = Vec::new();
        for outcome in &stored {
            let Some(stimulus) = self.stimuli.get(&outcome.source_stimulus) else {
                // Purged by a concurrent aggregation after the check above.
                self.outcomes.remove(&outcome.id);
                continue;
            };
            let Some(uow) = stimulus.uow.clone() else {
                debug!(stimulus = %stimulus.id, "stimulus has no uow; nothing to complete");
                continue;
            };
            let (Some(behaviour), Some(affected)) = (&outcome.source_behaviour, &outcome.affecting_twin)
            else {
                continue;
            };
            self.causality
                .set_status(CausalStatus::Finished, behaviour, affected, &stimulus.id, &uow);
            if !touched.contains(&uow) {
                touched.push(uow);
            }
        }

        let mut published = Vec::new();
        for uow in touched {
            if self.causality.try_begin_aggregation(&uow) {
                self.aggregate_and_publish(&uow);
                published.push(uow);
            }
        }
        published
    }

    // -----------------------------------------------------------------------
    // Stage 8: aggregation
    // -----------------------------------------------------------------------

    /// Fold every outcome of `uow` into its egress, publish it, then purge
    /// everything held for it.
    pub fn aggregate_and_publish(&self, uow: &UowId) {
        let stimulus_ids = self.stimuli.get_for_uow(uow);
        let outcomes: Vec<Outcome> = stimulus_ids
            .iter()
            .flat_map(|stimulus| self.outcomes.get_by_stimulus(stimulus))
            .collect();

        match self.work.get(uow) {
            Some(mut unit) => {
                for outcome in &outcomes {
                    self.append_egress(&mut unit, outcome);
                }
                unit.outcome = ProcessingOutcome::Success;
                self.publish(unit);
            }
            None => warn!(%uow, "aggregation for uow missing from work cache; nothing to publish"),
        }

        let mut purged_outcomes = 0;
        for stimulus in &stimulus_ids {
            purged_outcomes += self.outcomes.remove_all_for_stimulus(stimulus);
            self.stimuli.remove(stimulus);
        }
        self.causality.purge(uow);
        debug!(%uow, stimuli = stimulus_ids.len(), outcomes = purged_outcomes, "uow state purged");
    }

    fn append_egress(&self, unit: &mut UnitOfWork, outcome: &Outcome) {
        if !outcome.forward_to_edge {
            unit.egress.push(EgressPayload::untagged(outcome.resource.clone()));
            return;
        }
        let forwarders = match &outcome.affecting_twin {
            Some(twin) => self.forwarders.get(twin),
            None => BTreeSet::new(),
        };
        if forwarders.is_empty() {
            debug!(uow = %unit.id, outcome = %outcome.id, "edge outcome but twin has no forwarders");
        }
        for forwarder in forwarders {
            unit.egress
                .push(EgressPayload::for_destination(outcome.resource.clone(), forwarder));
        }
    }

    // -----------------------------------------------------------------------
    // Stage 9: publication
    // -----------------------------------------------------------------------

    /// Stamp the stored transport metadata with the UoW's final status and
    /// hand everything to the publish sink. The work cache entry is dropped
    /// afterwards whether or not delivery succeeded.
    pub fn publish(&self, uow: UnitOfWork) {
        let Some(entry) = self.work.entry(&uow.id) else {
            warn!(uow = %uow.id, "publish: no transport metadata stored; not delivered");
            return;
        };

        let (activity, parcel) = match uow.outcome {
            ProcessingOutcome::Success => (ActivityStatus::Finished, ParcelProcessingStatus::Finished),
            _ => (ActivityStatus::Failed, ParcelProcessingStatus::Failed),
        };
        let mut job_card = entry.job_card;
        job_card.current_status = activity;
        job_card.requested_status = activity;
        let parcel_status = ParcelStatus {
            status: parcel,
            entry_date: Utc::now(),
        };

        let id = uow.id.clone();
        info!(uow = %id, outcome = %uow.outcome, egress = uow.egress.len(), source = %entry.source_key, "publishing uow");
        let delivery = Delivery {
            uow,
            job_card,
            parcel_status,
            source_key: entry.source_key,
        };
        if let Err(e) = self.publish_sink.deliver(delivery) {
            error!(uow = %id, error = %e, "publish sink rejected uow");
        }
        self.work.remove(&id);
    }
}
