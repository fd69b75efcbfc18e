//! Stage 4/5: hand queued packages to idle twins, on a fixed schedule.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::Orchestrator;
use crate::config::DispatchConfig;
use crate::error::{Result, TwinpathError};

impl Orchestrator {
    /// One dispatch pass: every idle twin with queued work gets its head
    /// package submitted and is marked busy with that package's behaviour.
    /// Busy twins are skipped until their completion arrives.
    ///
    /// Returns the number of packages submitted.
    pub fn dispatch_tick(&self) -> usize {
        let mut submitted = 0;
        for twin in self.queues.twins_with_pending_work() {
            let claimed = self.busy.claim_with(&twin, || {
                let package = self.queues.dequeue_next(&twin)?;
                let Some(endpoint) = self.endpoint_for(&package.target_behaviour) else {
                    warn!(
                        %twin,
                        behaviour = %package.target_behaviour,
                        package = %package.id,
                        "no endpoint registered for behaviour; package discarded"
                    );
                    return None;
                };
                Some((package.target_behaviour.clone(), (package, endpoint)))
            });
            let Some((package, endpoint)) = claimed else {
                continue;
            };

            debug!(%twin, behaviour = %package.target_behaviour, %endpoint, package = %package.id, "dispatching");
            let behaviour = package.target_behaviour.clone();
            self.dispatch_sink.submit(&behaviour, &endpoint, package);
            submitted += 1;
        }
        submitted
    }

    /// Start the periodic dispatch loop on the current tokio runtime.
    ///
    /// The first tick fires after `config.initial_delay()`, then every
    /// `config.period()`. Only one loop may run per orchestrator at a time.
    pub fn spawn_dispatcher(self: &Arc<Self>, config: &DispatchConfig) -> Result<DispatcherHandle> {
        if config.period_ms == 0 {
            return Err(TwinpathError::Config(
                "dispatch.period_ms must be greater than zero".to_string(),
            ));
        }
        if self.dispatcher_running.swap(true, Ordering::SeqCst) {
            return Err(TwinpathError::DispatcherRunning);
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let orchestrator = Arc::clone(self);
        let start = Instant::now() + config.initial_delay();
        let period = config.period();
        info!(initial_delay_ms = config.initial_delay_ms, period_ms = config.period_ms, "dispatcher started");

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let submitted = orchestrator.dispatch_tick();
                        if submitted > 0 {
                            debug!(submitted, "dispatch tick");
                        }
                    }
                    changed = stop_rx.changed() => {
                        // A dropped handle closes the channel and stops the loop too.
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            orchestrator.dispatcher_running.store(false, Ordering::SeqCst);
            info!("dispatcher stopped");
        });

        Ok(DispatcherHandle { stop_tx, task })
    }
}

/// Controls a running dispatch loop. Dropping it stops the loop without
/// waiting for it.
pub struct DispatcherHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stop the loop and wait for the in-progress tick, if any, to finish.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "dispatcher task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
