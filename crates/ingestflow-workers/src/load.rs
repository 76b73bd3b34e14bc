//! Load Worker (spec §4.5): upserts one batch's entity drafts, then queues
//! `vectorize` work for every entity whose text fingerprint changed. Also
//! drives the deferred-entity sweep periodically, independent of any
//! single `load` message (spec §4.5 "re-attempted on the next sweep").

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ingestflow_core::entities::EntityDrafts;
use ingestflow_core::events::PipelineEvent;
use ingestflow_core::messages::{LoadMessage, Queue, VectorizeMessage};
use ingestflow_progress::Broker;
use ingestflow_queue::{ClaimedMessage, QueueBus};
use ingestflow_scheduler::Scheduler;
use ingestflow_storage::{EntityRepository, LoadOutcome};
use tracing::{instrument, warn};

use crate::pool::{Disposition, MessageHandler};
use crate::run_finalize::finalize_run;

pub struct LoadWorker {
    entities: EntityRepository,
    bus: Arc<dyn QueueBus>,
    broker: Broker,
    scheduler: Scheduler,
}

impl LoadWorker {
    pub fn new(entities: EntityRepository, bus: Arc<dyn QueueBus>, broker: Broker, scheduler: Scheduler) -> Self {
        Self { entities, bus, broker, scheduler }
    }

    /// Publishes one vectorize message per changed entity, returning how
    /// many were fanned out so the caller can open that many units in the
    /// run's in-flight batch counter (spec §4.3 step 5).
    #[instrument(skip(self, outcome))]
    async fn publish_text_changes(&self, load: &LoadMessage, outcome: &LoadOutcome) -> Result<i64, String> {
        let mut fanned_out = 0i64;
        for change in &outcome.text_changes {
            let message = VectorizeMessage {
                tenant_id: load.tenant_id,
                job_id: load.job_id,
                job_name: load.job_name.clone(),
                entity_kind: change.entity_kind,
                entity_id: change.entity_id.clone(),
                text_fingerprint: change.text_fingerprint.clone(),
            };
            self.bus
                .publish(Queue::Vectorize, load.tenant_id, serde_json::to_value(&message).unwrap_or_default())
                .await
                .map_err(|e| e.to_string())?;
            fanned_out += 1;
        }
        Ok(fanned_out)
    }

    /// Closes this message's unit in the run's in-flight batch counter,
    /// opening `fanned_out` new ones (one per vectorize message); finalizes
    /// the run if this was the last one open (spec §4.3 step 5).
    async fn close_batch(&self, load: &LoadMessage, fanned_out: i64) {
        if self.scheduler.run_tracker().close_and_open(load.job_id, fanned_out) {
            finalize_run(&self.scheduler, &self.broker, load.job_id, load.tenant_id, &load.job_name).await;
        }
    }

    fn emit_warnings(&self, tenant_id: i64, job_name: &str, outcome: &LoadOutcome) {
        for warning in &outcome.warnings {
            warn!(tenant_id, warning, "load warning");
            self.broker.publish(tenant_id, PipelineEvent::progress(job_name.to_string(), None, warning.clone()));
        }
    }

    /// Run the deferred-entity sweep on a fixed cadence until `shutdown`
    /// fires (spec §4.5). Separate from the message-handler loop since
    /// deferred passes aren't triggered by any particular `load` message.
    pub async fn run_deferred_sweep(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.entities.process_deferred().await {
                        // Deferred entities span tenants, so these warnings
                        // aren't attributable to one job's progress stream;
                        // log them instead of publishing through the broker.
                        Ok(outcome) => {
                            for warning in &outcome.warnings {
                                warn!(warning, "deferred-entity sweep warning");
                            }
                        }
                        Err(e) => warn!(error = %e, "deferred-entity sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MessageHandler for LoadWorker {
    async fn handle(&self, message: ClaimedMessage) -> Disposition {
        let load: LoadMessage = match serde_json::from_value(message.payload) {
            Ok(m) => m,
            Err(e) => return Disposition::DeadLetter(format!("malformed load message: {e}")),
        };

        if entity_drafts_reference_missing_tenant(&load.entities, load.tenant_id) {
            self.close_batch(&load, 0).await;
            return Disposition::DeadLetter("entity draft tenant_id mismatch".to_string());
        }

        let outcome = match self.entities.load_batch(load.tenant_id, &load.entities).await {
            Ok(outcome) => outcome,
            Err(e) => return Disposition::Retry(e.to_string()),
        };

        self.emit_warnings(load.tenant_id, &load.job_name, &outcome);

        match self.publish_text_changes(&load, &outcome).await {
            Ok(fanned_out) => {
                self.close_batch(&load, fanned_out).await;
                Disposition::Ack
            }
            Err(reason) => Disposition::Retry(reason),
        }
    }
}

/// Tenant isolation invariant (spec §3, §8): a draft batch must never
/// carry an entity stamped with a different tenant than its envelope.
fn entity_drafts_reference_missing_tenant(drafts: &EntityDrafts, tenant_id: i64) -> bool {
    drafts.projects.iter().any(|p| p.tenant_id != tenant_id)
        || drafts.users.iter().any(|u| u.tenant_id != tenant_id)
        || drafts.work_items.iter().any(|w| w.tenant_id != tenant_id)
        || drafts.pull_requests.iter().any(|p| p.tenant_id != tenant_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestflow_core::entities::{CanonicalUser, Project};
    use chrono::Utc;

    #[test]
    fn detects_cross_tenant_drafts() {
        let mut drafts = EntityDrafts::default();
        drafts.projects.push(Project {
            tenant_id: 2,
            external_key: "PROJ".into(),
            name: "Proj".into(),
            updated_at: Utc::now(),
        });
        assert!(entity_drafts_reference_missing_tenant(&drafts, 1));
    }

    #[test]
    fn same_tenant_drafts_pass() {
        let mut drafts = EntityDrafts::default();
        drafts.users.push(CanonicalUser {
            tenant_id: 1,
            external_id: "u1".into(),
            display_name: "Ada".into(),
            email: None,
            updated_at: Utc::now(),
        });
        assert!(!entity_drafts_reference_missing_tenant(&drafts, 1));
    }
}
