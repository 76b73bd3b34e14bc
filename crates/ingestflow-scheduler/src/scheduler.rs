//! The Scheduler (spec §4.1): a single coordinating fire loop, grounded in
//! `durable::worker::pool`'s `watch`-based shutdown plus
//! `durable_task_queue`'s claim-via-CAS pattern reused here for the Job row
//! itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ingestflow_core::job::JobStatus;
use ingestflow_core::messages::{ExtractMessage, Queue};
use ingestflow_queue::QueueBus;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::cancellation::CancellationRegistry;
use crate::fire_time::order_due;
use crate::run_tracker::RunTracker;
use crate::store::SchedulerStore;
use crate::Result;

#[derive(Clone)]
pub struct Scheduler {
    jobs: Arc<dyn SchedulerStore>,
    bus: Arc<dyn QueueBus>,
    tick_interval: Duration,
    abandonment_multiplier: u32,
    cancellations: CancellationRegistry,
    run_tracker: RunTracker,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn SchedulerStore>,
        bus: Arc<dyn QueueBus>,
        tick_interval: Duration,
        abandonment_multiplier: u32,
        cancellations: CancellationRegistry,
    ) -> Self {
        Self {
            jobs,
            bus,
            tick_interval,
            abandonment_multiplier,
            cancellations,
            run_tracker: RunTracker::new(),
        }
    }

    /// Shared with the Extract Worker, which checks its job's token between
    /// page fetches instead of polling the Job row (spec §5).
    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    /// Shared with Extract/Transform/Load/Vectorize, which close and fan out
    /// batches for the run they're each touching (spec §4.3 step 5).
    pub fn run_tracker(&self) -> &RunTracker {
        &self.run_tracker
    }

    /// `ScheduleAllActive()` (spec §4.1): called once on boot, before the
    /// fire loop starts, to reclaim jobs abandoned by a crashed prior
    /// process.
    #[instrument(skip(self))]
    pub async fn schedule_all_active(&self) -> Result<()> {
        let reclaimed = self.jobs.reclaim_abandoned(self.abandonment_multiplier).await?;
        if !reclaimed.is_empty() {
            warn!(count = reclaimed.len(), jobs = ?reclaimed, "reclaimed abandoned jobs on boot");
        }
        Ok(())
    }

    /// Run the fire loop until `shutdown` fires (spec §5 "graceful
    /// shutdown"). One tick per `tick_interval`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One fire-loop pass: load active jobs, fire every one due, in
    /// deterministic (fire_time, id) order (spec §4.1 "On tie, fire the job
    /// with the lower id first").
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<()> {
        let active = self.jobs.list_active().await?;
        let now = Utc::now();
        let due = order_due(&active, now);

        for job in due {
            self.fire(job.id, job.tenant_id, job.job_name.clone(), job.integration_id, job.status)
                .await?;
        }
        Ok(())
    }

    /// Single-active-run enforcement + publish (spec §4.1 "Single-active-run
    /// enforcement"). `from_status` is the status observed when the job was
    /// selected as due; the CAS itself re-checks it atomically.
    #[instrument(skip(self))]
    async fn fire(
        &self,
        job_id: i64,
        tenant_id: i64,
        job_name: String,
        integration_id: i64,
        from_status: JobStatus,
    ) -> Result<()> {
        let fired = self.jobs.cas_fire(job_id, &[from_status]).await?;
        let Some(job) = fired else {
            // Already RUNNING or deactivated concurrently; suppress.
            return Ok(());
        };
        // A prior run's cancellation must not leak into this one.
        self.cancellations.clear(job_id);

        let message = ExtractMessage {
            tenant_id,
            job_id,
            job_name,
            integration_id,
            checkpoint: job.checkpoint_data,
        };

        match self
            .bus
            .publish(Queue::Extract, tenant_id, serde_json::to_value(&message).unwrap_or_default())
            .await
        {
            Ok(_) => {
                info!(job_id, "fired job");
                self.run_tracker.begin_run(job_id);
                Ok(())
            }
            Err(e) => {
                // spec §5 "Backpressure": "the current tick is skipped and
                // the job returns to READY with retry_count unchanged".
                warn!(job_id, error = %e, "publish failed, reverting fire");
                self.jobs.revert_fire(job_id, from_status).await?;
                Ok(())
            }
        }
    }

    /// `ReportRunFinished(success=true)` (spec §4.1). Called once the
    /// run's in-flight batch counter has drained (spec §4.3 step 5).
    #[instrument(skip(self, checkpoint))]
    pub async fn report_run_finished(&self, job_id: i64, checkpoint: Option<serde_json::Value>) -> Result<()> {
        self.jobs.mark_finished(job_id, checkpoint).await?;
        self.run_tracker.forget(job_id);
        Ok(())
    }

    /// `ReportRunFinished(success=false)` (spec §4.1).
    #[instrument(skip(self))]
    pub async fn report_run_failed(&self, job_id: i64, error_message: &str) -> Result<()> {
        self.jobs.mark_failed(job_id, error_message).await?;
        self.run_tracker.forget(job_id);
        Ok(())
    }

    /// Admin mutation: toggle `active` (spec §4.9).
    pub async fn set_active(&self, job_id: i64, active: bool) -> Result<()> {
        self.jobs.set_active(job_id, active).await?;
        Ok(())
    }

    /// Admin mutation: update schedule/retry intervals (spec §4.9).
    pub async fn update_intervals(
        &self,
        job_id: i64,
        schedule_interval_minutes: i32,
        retry_interval_minutes: i32,
    ) -> Result<()> {
        self.jobs
            .update_intervals(job_id, schedule_interval_minutes, retry_interval_minutes)
            .await?;
        Ok(())
    }

    /// Admin mutation: reset checkpoint (spec §4.9).
    pub async fn reset_checkpoint(&self, job_id: i64) -> Result<()> {
        self.jobs.reset_checkpoint(job_id).await?;
        Ok(())
    }

    /// Admin mutation: cancel the current run (spec §4.9).
    pub async fn cancel_run(&self, job_id: i64) -> Result<()> {
        self.jobs.cancel_run(job_id).await?;
        self.cancellations.cancel(job_id);
        self.run_tracker.forget(job_id);
        Ok(())
    }
}
