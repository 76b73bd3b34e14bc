//! Scheduler fire-loop tests against in-memory doubles, grounded in
//! `durable::persistence::memory::InMemoryWorkflowEventStore` +
//! `durable/tests/` (a `#[tokio::test]` suite run without a database).
//! Covers the scenario-1 (clean run), scenario-5 (failure escalation), and
//! backpressure-revert properties from spec §8.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ingestflow_core::job::{Job, JobStatus};
use ingestflow_core::messages::Queue;
use ingestflow_queue::{ClaimedMessage, NackOutcome, QueueBus, QueueError, Result as QueueResult, RetryPolicy};
use ingestflow_scheduler::{CancellationRegistry, Scheduler, SchedulerStore};
use ingestflow_storage::StoreError;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

type StoreResult<T> = std::result::Result<T, StoreError>;

struct InMemoryJobStore {
    jobs: Mutex<HashMap<i64, Job>>,
}

impl InMemoryJobStore {
    fn seeded(job: Job) -> Self {
        let mut jobs = HashMap::new();
        jobs.insert(job.id, job);
        Self { jobs: Mutex::new(jobs) }
    }

    fn snapshot(&self, job_id: i64) -> Job {
        self.jobs.lock().get(&job_id).cloned().expect("job seeded")
    }
}

#[async_trait]
impl SchedulerStore for InMemoryJobStore {
    async fn list_active(&self) -> StoreResult<Vec<Job>> {
        Ok(self.jobs.lock().values().filter(|j| j.active).cloned().collect())
    }

    async fn cas_fire(&self, job_id: i64, from_statuses: &[JobStatus]) -> StoreResult<Option<Job>> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if !job.active || !from_statuses.contains(&job.status) {
            return Ok(None);
        }
        job.status = JobStatus::Running;
        job.last_run_started_at = Some(Utc::now());
        job.error_message = None;
        Ok(Some(job.clone()))
    }

    async fn mark_finished(&self, job_id: i64, checkpoint: Option<Value>) -> StoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        job.status = JobStatus::Finished;
        job.last_run_finished_at = Some(Utc::now());
        job.retry_count = 0;
        job.error_message = None;
        if let Some(checkpoint) = checkpoint {
            job.checkpoint_data = checkpoint;
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: i64, error_message: &str) -> StoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        job.status = JobStatus::Failed;
        job.retry_count += 1;
        job.error_message = Some(error_message.to_string());
        Ok(())
    }

    async fn reclaim_abandoned(&self, _multiplier: u32) -> StoreResult<Vec<i64>> {
        Ok(vec![])
    }

    async fn set_active(&self, job_id: i64, active: bool) -> StoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        job.active = active;
        Ok(())
    }

    async fn update_intervals(&self, job_id: i64, schedule: i32, retry: i32) -> StoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        job.schedule_interval_minutes = schedule;
        job.retry_interval_minutes = retry;
        Ok(())
    }

    async fn reset_checkpoint(&self, job_id: i64) -> StoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        job.checkpoint_data = serde_json::json!({});
        job.status = JobStatus::Ready;
        job.retry_count = 0;
        Ok(())
    }

    async fn cancel_run(&self, job_id: i64) -> StoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        if job.status == JobStatus::Running {
            job.status = JobStatus::Failed;
            job.error_message = Some("cancelled".to_string());
        }
        Ok(())
    }

    async fn revert_fire(&self, job_id: i64, to_status: JobStatus) -> StoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        if job.status == JobStatus::Running {
            job.status = to_status;
            job.last_run_started_at = None;
        }
        Ok(())
    }
}

/// Publishes that always succeed, or always fail, to exercise the
/// backpressure-revert path (spec §5 "Backpressure").
struct InMemoryBus {
    fail_publish: bool,
    published: Mutex<Vec<(Queue, i64)>>,
}

impl InMemoryBus {
    fn new(fail_publish: bool) -> Self {
        Self { fail_publish, published: Mutex::new(vec![]) }
    }
}

#[async_trait]
impl QueueBus for InMemoryBus {
    async fn publish(&self, queue: Queue, tenant_id: i64, _payload: Value) -> QueueResult<Uuid> {
        if self.fail_publish {
            return Err(QueueError::Database(sqlx::Error::PoolClosed));
        }
        self.published.lock().push((queue, tenant_id));
        Ok(Uuid::now_v7())
    }

    async fn claim(&self, _queue: Queue, _worker_id: &str, _max: usize) -> QueueResult<Vec<ClaimedMessage>> {
        Ok(vec![])
    }

    async fn ack(&self, _message_id: Uuid) -> QueueResult<()> {
        Ok(())
    }

    async fn nack(&self, _message_id: Uuid, _error: &str, _policy: &RetryPolicy) -> QueueResult<NackOutcome> {
        Ok(NackOutcome::DeadLettered)
    }

    async fn dead_letter_depth(&self, _queue: Queue) -> QueueResult<i64> {
        Ok(0)
    }
}

fn ready_job(id: i64) -> Job {
    Job {
        id,
        tenant_id: 1,
        job_name: "issue-tracker-sync".to_string(),
        integration_id: 1,
        status: JobStatus::Ready,
        schedule_interval_minutes: 15,
        retry_interval_minutes: 5,
        last_run_started_at: None,
        last_run_finished_at: None,
        retry_count: 0,
        error_message: None,
        checkpoint_data: serde_json::json!({}),
        active: true,
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn clean_first_run_fires_and_finishes() {
    let store = Arc::new(InMemoryJobStore::seeded(ready_job(1)));
    let scheduler_store: Arc<dyn SchedulerStore> = store.clone();
    let bus = Arc::new(InMemoryBus::new(false));
    let scheduler = Scheduler::new(
        scheduler_store,
        Arc::clone(&bus) as Arc<dyn QueueBus>,
        std::time::Duration::from_secs(1),
        4,
        CancellationRegistry::new(),
    );

    scheduler.tick().await.unwrap();
    let job = store.snapshot(1);
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(bus.published.lock().as_slice(), [(Queue::Extract, 1)]);

    scheduler.report_run_finished(1, Some(serde_json::json!({"cursor": "abc"}))).await.unwrap();
    let job = store.snapshot(1);
    assert_eq!(job.status, JobStatus::Finished);
    assert_eq!(job.checkpoint_data, serde_json::json!({"cursor": "abc"}));
    assert_eq!(job.retry_count, 0);
}

#[tokio::test]
async fn single_active_run_is_enforced() {
    let mut job = ready_job(1);
    job.status = JobStatus::Running;
    let store: Arc<dyn SchedulerStore> = Arc::new(InMemoryJobStore::seeded(job));
    let bus = Arc::new(InMemoryBus::new(false));

    let fired = store.cas_fire(1, &[JobStatus::Ready, JobStatus::Failed]).await.unwrap();
    assert!(fired.is_none(), "a RUNNING job must not be fired again");
    assert!(bus.published.lock().is_empty());
}

#[tokio::test]
async fn backpressure_reverts_job_to_ready_on_publish_failure() {
    let store = Arc::new(InMemoryJobStore::seeded(ready_job(1)));
    let scheduler_store: Arc<dyn SchedulerStore> = store.clone();
    let bus: Arc<dyn QueueBus> = Arc::new(InMemoryBus::new(true));
    let scheduler = Scheduler::new(
        scheduler_store,
        bus,
        std::time::Duration::from_secs(1),
        4,
        CancellationRegistry::new(),
    );

    scheduler.tick().await.unwrap();

    let job = store.snapshot(1);
    assert_eq!(job.status, JobStatus::Ready, "failed publish must revert the CAS, not strand the job RUNNING");
    assert_eq!(job.retry_count, 0, "spec §5: retry_count is unchanged on a skipped tick");
}

#[tokio::test]
async fn failure_escalation_increments_retry_count_and_clamps_backoff() {
    let store = Arc::new(InMemoryJobStore::seeded(ready_job(1)));
    let scheduler_store: Arc<dyn SchedulerStore> = store.clone();
    let bus: Arc<dyn QueueBus> = Arc::new(InMemoryBus::new(false));
    let scheduler = Scheduler::new(
        scheduler_store,
        bus,
        std::time::Duration::from_secs(1),
        4,
        CancellationRegistry::new(),
    );

    for expected_retry_count in 1..=5 {
        scheduler.tick().await.unwrap();
        let job = store.snapshot(1);
        assert_eq!(job.status, JobStatus::Running);
        scheduler.report_run_failed(1, "boom").await.unwrap();
        let job = store.snapshot(1);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, expected_retry_count);
        // Make the job immediately due again for the next iteration.
        store.jobs.lock().get_mut(&1).unwrap().last_run_started_at =
            Some(Utc::now() - chrono::Duration::hours(1));
    }

    let job = store.snapshot(1);
    assert_eq!(job.retry_count, 5);
}

#[tokio::test]
async fn admin_cancel_marks_running_job_failed_and_clears_cancellation_token() {
    let mut job = ready_job(1);
    job.status = JobStatus::Running;
    let store = Arc::new(InMemoryJobStore::seeded(job));
    let scheduler_store: Arc<dyn SchedulerStore> = store.clone();
    let bus: Arc<dyn QueueBus> = Arc::new(InMemoryBus::new(false));
    let cancellations = CancellationRegistry::new();
    let token = cancellations.token_for(1);
    let scheduler = Scheduler::new(scheduler_store, bus, std::time::Duration::from_secs(1), 4, cancellations);

    scheduler.cancel_run(1).await.unwrap();

    let job = store.snapshot(1);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("cancelled"));
    assert!(token.is_cancelled());
}
