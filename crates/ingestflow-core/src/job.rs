//! Job: the scheduler's unit of work (spec §3). 14-column shape; mutated
//! only by the Scheduler and, for `checkpoint_data`, the Extract Worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `status ∈ {READY, RUNNING, FINISHED, FAILED}` — only these four exist.
/// There is no terminal state: FINISHED and FAILED are resting states
/// between fires (spec §4.1 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Ready,
    Running,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Ready => "READY",
            JobStatus::Running => "RUNNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READY" => Ok(JobStatus::Ready),
            "RUNNING" => Ok(JobStatus::Running),
            "FINISHED" => Ok(JobStatus::Finished),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// The 14-column Job row (spec §3):
/// id, tenant_id, job_name, integration_id, status, schedule_interval_minutes,
/// retry_interval_minutes, last_run_started_at, last_run_finished_at,
/// retry_count, error_message, checkpoint_data, active, updated_at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub tenant_id: i64,
    /// Unique per tenant (`(job_name, tenant_id)` is unique, spec §3).
    pub job_name: String,
    pub integration_id: i64,
    pub status: JobStatus,
    pub schedule_interval_minutes: i32,
    pub retry_interval_minutes: i32,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_finished_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    /// Opaque JSON owned by the adapter. Written only by the Extract Worker,
    /// read and reset by the Scheduler. Never inspected by the Scheduler.
    pub checkpoint_data: serde_json::Value,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Effective retry delay per spec §4.1: "exponential clamp: effective
    /// retry delay is `retry_interval_minutes × min(2^(retry_count-1), 8)`".
    pub fn effective_retry_interval_minutes(&self) -> i64 {
        if self.retry_count <= 0 {
            return self.retry_interval_minutes as i64;
        }
        let multiplier = 1i64 << (self.retry_count - 1).min(3); // 2^(n-1), capped at 8 (2^3)
        (self.retry_interval_minutes as i64) * multiplier
    }
}

impl crate::tenant::TenantScoped for Job {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}

/// `schedule_interval_minutes=0` is rejected at admin-mutation time
/// (spec §8 boundary behavior).
pub fn validate_schedule_interval(minutes: i32) -> crate::error::Result<()> {
    if minutes <= 0 {
        return Err(crate::error::CoreError::Validation(
            "schedule_interval_minutes must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_retry_count(retry_count: i32) -> Job {
        Job {
            id: 1,
            tenant_id: 1,
            job_name: "j".into(),
            integration_id: 1,
            status: JobStatus::Failed,
            schedule_interval_minutes: 60,
            retry_interval_minutes: 5,
            last_run_started_at: None,
            last_run_finished_at: None,
            retry_count,
            error_message: None,
            checkpoint_data: serde_json::json!({}),
            active: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn retry_backoff_clamps_at_eight_times() {
        assert_eq!(job_with_retry_count(0).effective_retry_interval_minutes(), 5);
        assert_eq!(job_with_retry_count(1).effective_retry_interval_minutes(), 5);
        assert_eq!(job_with_retry_count(2).effective_retry_interval_minutes(), 10);
        assert_eq!(job_with_retry_count(3).effective_retry_interval_minutes(), 20);
        assert_eq!(job_with_retry_count(4).effective_retry_interval_minutes(), 40);
        // fourth consecutive failure (retry_count=4) caps at x8 per spec scenario 5
        assert_eq!(job_with_retry_count(5).effective_retry_interval_minutes(), 40);
        assert_eq!(job_with_retry_count(10).effective_retry_interval_minutes(), 40);
    }

    #[test]
    fn rejects_zero_schedule_interval() {
        assert!(validate_schedule_interval(0).is_err());
        assert!(validate_schedule_interval(60).is_ok());
    }
}
