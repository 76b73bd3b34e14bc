//! `SchedulerStore`: the Scheduler's only dependency on persistence,
//! grounded in `durable::persistence::store::WorkflowEventStore` (a trait
//! the fire loop depends on, with a Postgres implementation and an
//! in-memory one for tests). Keeping the Scheduler generic over this trait
//! rather than the concrete `JobRepository` is what lets `tick`/`fire` be
//! exercised in a `tokio::test` without a database (spec §8).

use async_trait::async_trait;
use ingestflow_core::job::{Job, JobStatus};
use ingestflow_storage::{JobRepository, StoreError};
use serde_json::Value;

type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait SchedulerStore: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Job>>;
    async fn cas_fire(&self, job_id: i64, from_statuses: &[JobStatus]) -> Result<Option<Job>>;
    async fn mark_finished(&self, job_id: i64, checkpoint: Option<Value>) -> Result<()>;
    async fn mark_failed(&self, job_id: i64, error_message: &str) -> Result<()>;
    async fn reclaim_abandoned(&self, multiplier: u32) -> Result<Vec<i64>>;
    async fn set_active(&self, job_id: i64, active: bool) -> Result<()>;
    async fn update_intervals(
        &self,
        job_id: i64,
        schedule_interval_minutes: i32,
        retry_interval_minutes: i32,
    ) -> Result<()>;
    async fn reset_checkpoint(&self, job_id: i64) -> Result<()>;
    async fn cancel_run(&self, job_id: i64) -> Result<()>;
    async fn revert_fire(&self, job_id: i64, to_status: JobStatus) -> Result<()>;
}

#[async_trait]
impl SchedulerStore for JobRepository {
    async fn list_active(&self) -> Result<Vec<Job>> {
        JobRepository::list_active(self).await
    }

    async fn cas_fire(&self, job_id: i64, from_statuses: &[JobStatus]) -> Result<Option<Job>> {
        JobRepository::cas_fire(self, job_id, from_statuses).await
    }

    async fn mark_finished(&self, job_id: i64, checkpoint: Option<Value>) -> Result<()> {
        JobRepository::mark_finished(self, job_id, checkpoint).await
    }

    async fn mark_failed(&self, job_id: i64, error_message: &str) -> Result<()> {
        JobRepository::mark_failed(self, job_id, error_message).await
    }

    async fn reclaim_abandoned(&self, multiplier: u32) -> Result<Vec<i64>> {
        JobRepository::reclaim_abandoned(self, multiplier).await
    }

    async fn set_active(&self, job_id: i64, active: bool) -> Result<()> {
        JobRepository::set_active(self, job_id, active).await
    }

    async fn update_intervals(
        &self,
        job_id: i64,
        schedule_interval_minutes: i32,
        retry_interval_minutes: i32,
    ) -> Result<()> {
        JobRepository::update_intervals(self, job_id, schedule_interval_minutes, retry_interval_minutes).await
    }

    async fn reset_checkpoint(&self, job_id: i64) -> Result<()> {
        JobRepository::reset_checkpoint(self, job_id).await
    }

    async fn cancel_run(&self, job_id: i64) -> Result<()> {
        JobRepository::cancel_run(self, job_id).await
    }

    async fn revert_fire(&self, job_id: i64, to_status: JobStatus) -> Result<()> {
        JobRepository::revert_fire(self, job_id, to_status).await
    }
}
