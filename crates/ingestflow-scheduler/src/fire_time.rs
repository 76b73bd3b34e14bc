//! Pure fire-time computation (spec §4.1 "Fire-time rule"), kept free of
//! any I/O so it is exhaustively unit-testable without a database.

use chrono::{DateTime, Utc};
use ingestflow_core::job::{Job, JobStatus};

/// Next fire time for `job`, or `None` if it should not be considered this
/// tick (currently `RUNNING`).
pub fn next_fire_at(job: &Job, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match job.status {
        JobStatus::Running => None,
        JobStatus::Failed if job.retry_count > 0 => {
            let started = job.last_run_started_at.unwrap_or(now);
            let minutes = job.effective_retry_interval_minutes();
            Some(started + chrono::Duration::minutes(minutes))
        }
        _ => match job.last_run_finished_at {
            Some(finished) => {
                let next = finished + chrono::Duration::minutes(job.schedule_interval_minutes as i64);
                Some(next.max(now))
            }
            None => Some(now),
        },
    }
}

pub fn is_due(job: &Job, now: DateTime<Utc>) -> bool {
    next_fire_at(job, now).is_some_and(|t| t <= now)
}

/// Deterministic tie-break ordering for a batch of due jobs (spec §4.1: "On
/// tie, fire the job with the lower id first").
pub fn order_due<'a>(jobs: &'a [Job], now: DateTime<Utc>) -> Vec<&'a Job> {
    let mut due: Vec<&Job> = jobs.iter().filter(|j| is_due(j, now)).collect();
    due.sort_by_key(|j| (next_fire_at(j, now).unwrap(), j.id));
    due
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn base_job() -> Job {
        Job {
            id: 1,
            tenant_id: 1,
            job_name: "issue-tracker".to_string(),
            integration_id: 1,
            status: JobStatus::Ready,
            schedule_interval_minutes: 15,
            retry_interval_minutes: 5,
            last_run_started_at: None,
            last_run_finished_at: None,
            retry_count: 0,
            error_message: None,
            checkpoint_data: json!({}),
            active: true,
            updated_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn running_job_is_skipped() {
        let now = Utc::now();
        let job = Job {
            status: JobStatus::Running,
            ..base_job()
        };
        assert_eq!(next_fire_at(&job, now), None);
        assert!(!is_due(&job, now));
    }

    #[test]
    fn never_run_job_fires_immediately() {
        let now = Utc::now();
        let job = base_job();
        assert_eq!(next_fire_at(&job, now), Some(now));
        assert!(is_due(&job, now));
    }

    #[test]
    fn finished_job_waits_for_schedule_interval() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let job = Job {
            status: JobStatus::Finished,
            last_run_finished_at: Some(now - chrono::Duration::minutes(5)),
            schedule_interval_minutes: 15,
            ..base_job()
        };
        let expected = now + chrono::Duration::minutes(10);
        assert_eq!(next_fire_at(&job, now), Some(expected));
        assert!(!is_due(&job, now));
        assert!(is_due(&job, expected));
    }

    #[test]
    fn failed_job_with_retries_uses_retry_interval_from_start_time() {
        let started = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let job = Job {
            status: JobStatus::Failed,
            last_run_started_at: Some(started),
            retry_count: 1,
            retry_interval_minutes: 5,
            ..base_job()
        };
        assert_eq!(next_fire_at(&job, started), Some(started + chrono::Duration::minutes(5)));
    }

    #[test]
    fn failed_job_retry_backoff_clamps_at_eight_times() {
        let started = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let job = Job {
            status: JobStatus::Failed,
            last_run_started_at: Some(started),
            retry_count: 4,
            retry_interval_minutes: 5,
            ..base_job()
        };
        // retry_count=4 -> multiplier x8 -> 40 minutes
        assert_eq!(next_fire_at(&job, started), Some(started + chrono::Duration::minutes(40)));
    }

    #[test]
    fn tie_breaks_on_lower_job_id() {
        let now = Utc::now();
        let job_a = Job { id: 5, ..base_job() };
        let job_b = Job { id: 2, ..base_job() };
        let jobs = vec![job_a, job_b];
        let ordered = order_due(&jobs, now);
        assert_eq!(ordered[0].id, 2);
        assert_eq!(ordered[1].id, 5);
    }
}
