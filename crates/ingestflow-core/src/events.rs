//! Progress / status / completion event shapes (spec §4.7). Delivered
//! best-effort to Subscriber Gateway clients, keyed by `(tenant_id, job_name)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Progress {
        job: String,
        /// `None` when the adapter can't estimate total pages (spec §4.3
        /// "Progress reporting": step-only progress in that case).
        percentage: Option<u8>,
        step: String,
        timestamp: DateTime<Utc>,
    },
    Status {
        job: String,
        status: JobStatus,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Completion {
        job: String,
        success: bool,
        summary: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn job_name(&self) -> &str {
        match self {
            PipelineEvent::Progress { job, .. } => job,
            PipelineEvent::Status { job, .. } => job,
            PipelineEvent::Completion { job, .. } => job,
        }
    }

    pub fn progress(job: impl Into<String>, percentage: Option<u8>, step: impl Into<String>) -> Self {
        PipelineEvent::Progress {
            job: job.into(),
            percentage,
            step: step.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn status(job: impl Into<String>, status: JobStatus, message: Option<String>) -> Self {
        PipelineEvent::Status {
            job: job.into(),
            status,
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn completion(job: impl Into<String>, success: bool, summary: impl Into<String>) -> Self {
        PipelineEvent::Completion {
            job: job.into(),
            success,
            summary: summary.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_none_for_unknown_total() {
        let ev = PipelineEvent::progress("issue-tracker", None, "processed 3 pages of unknown total");
        match ev {
            PipelineEvent::Progress { percentage, .. } => assert!(percentage.is_none()),
            _ => panic!("expected progress event"),
        }
    }

    #[test]
    fn job_name_extracted_for_every_variant() {
        assert_eq!(
            PipelineEvent::progress("j", Some(50), "step").job_name(),
            "j"
        );
        assert_eq!(
            PipelineEvent::status("j", JobStatus::Failed, None).job_name(),
            "j"
        );
        assert_eq!(
            PipelineEvent::completion("j", true, "ok").job_name(),
            "j"
        );
    }
}
