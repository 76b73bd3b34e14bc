//! Extract Worker (spec §4.3): drives one adapter session to exhaustion,
//! staging each page and handing it to Transform, advancing the job's
//! checkpoint only after the page is durably staged. Grounded in
//! `durable::activity::executor` calling into an `Activity` impl, adapted
//! here to loop `Plan`/`FetchPage` rather than run a single activity call.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ingestflow_adapters::{AdapterSession, IntegrationAdapter, IssueTrackerAdapter, SourceControlAdapter};
use ingestflow_core::error::{ClassifiedError, ErrorClass};
use ingestflow_core::events::PipelineEvent;
use ingestflow_core::integration::IntegrationKind;
use ingestflow_core::messages::{ExtractMessage, Queue, TransformMessage};
use ingestflow_queue::{CircuitBreaker, CircuitBreakerConfig, ClaimedMessage, QueueBus};
use ingestflow_progress::Broker;
use ingestflow_scheduler::Scheduler;
use ingestflow_storage::{CredentialsStore, IntegrationRepository, JobRepository, RawBatchRepository};
use tracing::{info, instrument, warn};

use crate::pool::{Disposition, MessageHandler};
use crate::run_finalize::finalize_run;

pub struct ExtractWorker {
    integrations: IntegrationRepository,
    credentials: Arc<dyn CredentialsStore>,
    raw_batches: RawBatchRepository,
    jobs: JobRepository,
    bus: Arc<dyn QueueBus>,
    scheduler: Scheduler,
    broker: Broker,
    issue_tracker: Arc<IssueTrackerAdapter>,
    source_control: Arc<SourceControlAdapter>,
    breakers: DashMap<(i64, i64), CircuitBreaker>,
}

impl ExtractWorker {
    pub fn new(
        integrations: IntegrationRepository,
        credentials: Arc<dyn CredentialsStore>,
        raw_batches: RawBatchRepository,
        jobs: JobRepository,
        bus: Arc<dyn QueueBus>,
        scheduler: Scheduler,
        broker: Broker,
        issue_tracker: Arc<IssueTrackerAdapter>,
        source_control: Arc<SourceControlAdapter>,
    ) -> Self {
        Self {
            integrations,
            credentials,
            raw_batches,
            jobs,
            bus,
            scheduler,
            broker,
            issue_tracker,
            source_control,
            breakers: DashMap::new(),
        }
    }

    fn adapter(&self, kind: IntegrationKind) -> Arc<dyn IntegrationAdapter> {
        match kind {
            IntegrationKind::IssueTracker => self.issue_tracker.clone() as Arc<dyn IntegrationAdapter>,
            IntegrationKind::SourceControl => self.source_control.clone() as Arc<dyn IntegrationAdapter>,
        }
    }

    /// One breaker per `(tenant_id, integration_id)`, since a failing
    /// integration for one tenant says nothing about another's.
    fn breaker_for(&self, tenant_id: i64, integration_id: i64) -> CircuitBreaker {
        self.breakers
            .entry((tenant_id, integration_id))
            .or_insert_with(|| CircuitBreaker::new(CircuitBreakerConfig::default()))
            .clone()
    }

    /// Runs a remote adapter call through the integration's breaker,
    /// recording the outcome so repeated failures trip it open and spare a
    /// struggling integration further load (spec §7 `TransientRemote`).
    async fn call_through_breaker<T, F>(
        &self,
        breaker: &CircuitBreaker,
        call: F,
    ) -> Result<T, RunFailure>
    where
        F: std::future::Future<Output = Result<T, ClassifiedError>>,
    {
        if breaker.allow().is_err() {
            return Err(RunFailure::terminal("integration circuit breaker is open"));
        }
        match call.await {
            Ok(value) => {
                breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                breaker.record_failure();
                Err(RunFailure::from_classified(e))
            }
        }
    }

    /// Drives one extraction run to exhaustion. Returns `true` if the run's
    /// in-flight batch counter was already drained by the time extraction
    /// itself stopped producing pages, meaning this call should finalize
    /// the run; otherwise some Transform/Load/Vectorize message is still in
    /// flight and whichever of them closes last will finalize it instead
    /// (spec §4.3 step 5).
    #[instrument(skip(self, extract), fields(job_id = extract.job_id, tenant_id = extract.tenant_id))]
    async fn run(&self, extract: &ExtractMessage) -> Result<bool, RunFailure> {
        let integration = self
            .integrations
            .get(extract.tenant_id, extract.integration_id)
            .await
            .map_err(RunFailure::transient)?;

        if !integration.active {
            return Err(RunFailure::terminal("integration is deactivated"));
        }

        let credentials = self
            .credentials
            .get(extract.tenant_id, extract.integration_id)
            .await
            .map_err(RunFailure::transient)?;

        let adapter = self.adapter(integration.kind);
        let breaker = self.breaker_for(extract.tenant_id, extract.integration_id);
        let session = self
            .call_through_breaker(&breaker, adapter.connect(credentials))
            .await?;

        let cancellation = self.scheduler.cancellations().token_for(extract.job_id);

        let mut cursor = self
            .call_through_breaker(&breaker, session.plan(&integration.base_search, extract.checkpoint.clone()))
            .await?;

        let mut pages_staged = 0u32;

        loop {
            if cancellation.is_cancelled() {
                info!(job_id = extract.job_id, "run cancelled, stopping extraction");
                return Err(RunFailure::Cancelled);
            }

            let page = self.call_through_breaker(&breaker, session.fetch_page(cursor.clone())).await?;

            let batch_id = self
                .raw_batches
                .stage(extract.tenant_id, extract.integration_id, adapter.batch_kind(), page.payload)
                .await
                .map_err(RunFailure::transient)?;
            pages_staged += 1;

            let message = TransformMessage {
                tenant_id: extract.tenant_id,
                job_id: extract.job_id,
                job_name: extract.job_name.clone(),
                batch_id,
                kind: adapter.batch_kind().to_string(),
            };
            self.bus
                .publish(Queue::Transform, extract.tenant_id, serde_json::to_value(&message).unwrap_or_default())
                .await
                .map_err(RunFailure::transient)?;
            self.scheduler.run_tracker().open_batches(extract.job_id, 1);

            match &page.next_cursor {
                Some(next) => {
                    self.jobs
                        .update_checkpoint(extract.job_id, next.clone())
                        .await
                        .map_err(RunFailure::transient)?;
                    cursor = next.clone();
                }
                None => {
                    self.broker.publish(
                        extract.tenant_id,
                        PipelineEvent::progress(extract.job_name.clone(), Some(100), "extraction complete"),
                    );
                    break;
                }
            }

            self.broker.publish(
                extract.tenant_id,
                PipelineEvent::progress(extract.job_name.clone(), page.progress_hint, format!("staged {pages_staged} pages")),
            );
        }

        self.scheduler.cancellations().clear(extract.job_id);
        Ok(self.scheduler.run_tracker().mark_extraction_done(extract.job_id))
    }
}

/// Outcome of a whole extraction run, distinct from `Disposition`: a
/// `RunFailure` always fails the *job run* (spec §4.1 `ReportRunFinished`);
/// it never determines message-delivery retry, since this message has
/// already been durably claimed once and the run's retry cadence is owned
/// by the Scheduler's `retry_interval_minutes`, not the queue.
enum RunFailure {
    Terminal(String),
    Cancelled,
}

impl RunFailure {
    fn terminal(message: impl Into<String>) -> Self {
        RunFailure::Terminal(message.into())
    }

    fn transient(e: impl std::fmt::Display) -> Self {
        RunFailure::Terminal(e.to_string())
    }

    fn from_classified(e: ingestflow_core::error::ClassifiedError) -> Self {
        if matches!(e.class, ErrorClass::TransientRemote | ErrorClass::Embedding) {
            // Inline retries are already exhausted by `AdapterHttpClient`
            // before a `ClassifiedError` ever reaches here.
        }
        RunFailure::Terminal(e.bounded_message())
    }
}

#[async_trait]
impl MessageHandler for ExtractWorker {
    async fn handle(&self, message: ClaimedMessage) -> Disposition {
        let extract: ExtractMessage = match serde_json::from_value(message.payload) {
            Ok(m) => m,
            Err(e) => return Disposition::DeadLetter(format!("malformed extract message: {e}")),
        };

        match self.run(&extract).await {
            Ok(complete) => {
                // Extraction drained the last open batch itself; otherwise
                // some Transform/Load/Vectorize message is still in flight
                // and will finalize the run when it closes (spec §4.3 step
                // 5). Either way the checkpoint is already durable from the
                // per-page `update_checkpoint` calls, so finalizing never
                // touches it.
                if complete {
                    finalize_run(&self.scheduler, &self.broker, extract.job_id, extract.tenant_id, &extract.job_name)
                        .await;
                }
                Disposition::Ack
            }
            Err(RunFailure::Cancelled) => {
                self.scheduler.cancellations().clear(extract.job_id);
                self.scheduler.run_tracker().forget(extract.job_id);
                Disposition::Ack
            }
            Err(RunFailure::Terminal(message)) => {
                if let Err(e) = self.scheduler.report_run_failed(extract.job_id, &message).await {
                    warn!(job_id = extract.job_id, error = %e, "failed to record run failure");
                }
                self.scheduler.cancellations().clear(extract.job_id);
                self.broker.publish(
                    extract.tenant_id,
                    PipelineEvent::completion(extract.job_name.clone(), false, message),
                );
                Disposition::Ack
            }
        }
    }
}
