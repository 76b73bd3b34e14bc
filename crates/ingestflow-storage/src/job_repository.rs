//! Job catalog persistence: the Scheduler's only mutable state (spec §5
//! "Shared-resource policy": "The Job row is the only mutable scheduler
//! state; writes are serialized per-row by the database").

use ingestflow_core::job::{Job, JobStatus};
use serde_json::Value;
use sqlx::Row;
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::{Result, StoreError};

#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job> {
    let status_str: String = row.get("status");
    let status = status_str
        .parse::<JobStatus>()
        .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;

    Ok(Job {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        job_name: row.get("job_name"),
        integration_id: row.get("integration_id"),
        status,
        schedule_interval_minutes: row.get("schedule_interval_minutes"),
        retry_interval_minutes: row.get("retry_interval_minutes"),
        last_run_started_at: row.get("last_run_started_at"),
        last_run_finished_at: row.get("last_run_finished_at"),
        retry_count: row.get("retry_count"),
        error_message: row.get("error_message"),
        checkpoint_data: row.get("checkpoint_data"),
        active: row.get("active"),
        updated_at: row.get("updated_at"),
    })
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// `ScheduleAllActive()`: every job with `active=true` (spec §4.1).
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, job_name, integration_id, status,
                   schedule_interval_minutes, retry_interval_minutes,
                   last_run_started_at, last_run_finished_at, retry_count,
                   error_message, checkpoint_data, active, updated_at
            FROM jobs
            WHERE active = true
            ORDER BY id
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    #[instrument(skip(self))]
    pub async fn get(&self, job_id: i64) -> Result<Job> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, job_name, integration_id, status,
                   schedule_interval_minutes, retry_interval_minutes,
                   last_run_started_at, last_run_finished_at, retry_count,
                   error_message, checkpoint_data, active, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or(StoreError::JobNotFound(job_id))?;

        row_to_job(&row)
    }

    /// Single-active-run enforcement (spec §4.1): `status READY → RUNNING,
    /// last_run_started_at = now, error_message = null`. Also fires on the
    /// retry path (FAILED -> RUNNING) when the retry fire time has arrived;
    /// the caller computes fire-time eligibility, this call only enforces
    /// the CAS. Returns `Ok(None)` if the CAS did not apply (already
    /// RUNNING, or `active=false`).
    #[instrument(skip(self))]
    pub async fn cas_fire(&self, job_id: i64, from_statuses: &[JobStatus]) -> Result<Option<Job>> {
        let from: Vec<&'static str> = from_statuses.iter().map(|s| s.as_str()).collect();

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'RUNNING',
                last_run_started_at = NOW(),
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND active = true
              AND status = ANY($2)
            RETURNING id, tenant_id, job_name, integration_id, status,
                      schedule_interval_minutes, retry_interval_minutes,
                      last_run_started_at, last_run_finished_at, retry_count,
                      error_message, checkpoint_data, active, updated_at
            "#,
        )
        .bind(job_id)
        .bind(&from)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(r) => {
                debug!(job_id, "CAS fire succeeded");
                Ok(Some(row_to_job(&r)?))
            }
            None => Ok(None),
        }
    }

    /// `ReportRunFinished(success=true)` (spec §4.1): FINISHED, reset
    /// retry_count, bump last_run_finished_at. `checkpoint` is left intact
    /// unless the caller supplies a trimmed baseline.
    #[instrument(skip(self, checkpoint))]
    pub async fn mark_finished(&self, job_id: i64, checkpoint: Option<Value>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'FINISHED',
                last_run_finished_at = NOW(),
                retry_count = 0,
                error_message = NULL,
                checkpoint_data = COALESCE($2, checkpoint_data),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(checkpoint)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// `ReportRunFinished(success=false)` (spec §4.1): FAILED,
    /// `retry_count += 1`, bounded `error_message`.
    #[instrument(skip(self))]
    pub async fn mark_failed(&self, job_id: i64, error_message: &str) -> Result<()> {
        let bounded: String = error_message.chars().take(2048).collect();

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'FAILED',
                retry_count = retry_count + 1,
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(bounded)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Checkpoint write (spec §4.3 step 4c): Extract Worker updates the Job
    /// row's checkpoint in the same transaction as a progress bump. Only
    /// the Extract Worker calls this outside of admin reset.
    #[instrument(skip(self, checkpoint))]
    pub async fn update_checkpoint(&self, job_id: i64, checkpoint: Value) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET checkpoint_data = $2, updated_at = NOW() WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(checkpoint)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Abandonment sweep (spec §4.1 "Failure semantics"): any job left
    /// RUNNING with `last_run_started_at` older than
    /// `max(schedule_interval, retry_interval) * multiplier` is transitioned
    /// to FAILED with `error_message = "abandoned on restart"`.
    #[instrument(skip(self))]
    pub async fn reclaim_abandoned(&self, multiplier: u32) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'FAILED',
                retry_count = retry_count + 1,
                error_message = 'abandoned on restart',
                updated_at = NOW()
            WHERE status = 'RUNNING'
              AND last_run_started_at IS NOT NULL
              AND last_run_started_at < NOW() - (
                    GREATEST(schedule_interval_minutes, retry_interval_minutes) * $1
                  ) * INTERVAL '1 minute'
            RETURNING id
            "#,
        )
        .bind(multiplier as i32)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    /// Admin mutation: toggle `active` (spec §6).
    #[instrument(skip(self))]
    pub async fn set_active(&self, job_id: i64, active: bool) -> Result<()> {
        sqlx::query("UPDATE jobs SET active = $2, updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .bind(active)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Admin mutation: update intervals (spec §6). Rejects
    /// `schedule_interval_minutes=0` per spec §8 boundary behavior.
    #[instrument(skip(self))]
    pub async fn update_intervals(
        &self,
        job_id: i64,
        schedule_interval_minutes: i32,
        retry_interval_minutes: i32,
    ) -> Result<()> {
        ingestflow_core::job::validate_schedule_interval(schedule_interval_minutes)
            .map_err(|e| StoreError::Database(sqlx::Error::Protocol(e.to_string())))?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET schedule_interval_minutes = $2, retry_interval_minutes = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(schedule_interval_minutes)
        .bind(retry_interval_minutes)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Admin mutation: reset checkpoint (spec §6): `checkpoint_data := {}`,
    /// `status := READY`, `retry_count := 0`.
    #[instrument(skip(self))]
    pub async fn reset_checkpoint(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET checkpoint_data = '{}'::jsonb,
                status = 'READY',
                retry_count = 0,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Admin mutation: cancel the current run (spec §5 "Cancellation &
    /// timeouts"). Sets status to FAILED with `error_message="cancelled"`;
    /// the cancellation *flag* itself is observed by the Extract Worker via
    /// a cancellation token, not by polling this row.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'FAILED', error_message = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(job_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Undo a `cas_fire` whose downstream publish failed (spec §5
    /// "Backpressure": "the current tick is skipped and the job returns to
    /// READY with retry_count unchanged"). Only valid while still RUNNING
    /// with no recorded finish; a concurrent `mark_finished`/`mark_failed`
    /// wins over this call since it is also scoped to `status = 'RUNNING'`.
    #[instrument(skip(self))]
    pub async fn revert_fire(&self, job_id: i64, to_status: JobStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, last_run_started_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(job_id)
        .bind(to_status.as_str())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Used by tests/provisioning; not part of the spec's admin surface.
    #[instrument(skip(self))]
    pub async fn create(&self, job: &NewJob) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (
                tenant_id, job_name, integration_id, status,
                schedule_interval_minutes, retry_interval_minutes,
                checkpoint_data, active, updated_at
            )
            VALUES ($1, $2, $3, 'READY', $4, $5, '{}'::jsonb, $6, NOW())
            RETURNING id
            "#,
        )
        .bind(job.tenant_id)
        .bind(&job.job_name)
        .bind(job.integration_id)
        .bind(job.schedule_interval_minutes)
        .bind(job.retry_interval_minutes)
        .bind(job.active)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("id"))
    }
}

#[derive(Debug)]
pub struct NewJob {
    pub tenant_id: i64,
    pub job_name: String,
    pub integration_id: i64,
    pub schedule_interval_minutes: i32,
    pub retry_interval_minutes: i32,
    pub active: bool,
}
