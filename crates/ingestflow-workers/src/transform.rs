//! Transform Worker (spec §4.4): normalizes one staged raw page into
//! canonical entity drafts. Per-entity failures are soft (spec §7 *Parse*
//! class: "continue the batch, mark the offending entity"); only malformed
//! envelopes or unrecognized `kind`s dead-letter the whole message.
//!
//! There is no fixed upstream wire schema to ground field names against, so
//! the per-`kind` item shapes below are this worker's own contract with the
//! two adapters' `payload` (each adapter's `fetch_page` is the producer).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingestflow_core::entities::{
    CanonicalState, CanonicalUser, EntityDrafts, Project, PullRequest, Status, StatusMapping,
    WorkItem, WorkItemPullRequestLink, Workflow, WorkflowMetrics,
};
use ingestflow_core::events::PipelineEvent;
use ingestflow_core::messages::{LoadMessage, Queue, TransformMessage};
use ingestflow_core::tenant::BatchId;
use ingestflow_progress::Broker;
use ingestflow_queue::{ClaimedMessage, QueueBus};
use ingestflow_scheduler::Scheduler;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{instrument, warn};

use ingestflow_storage::RawBatchRepository;

use crate::pool::{Disposition, MessageHandler};
use crate::run_finalize::finalize_run;

/// Work-item key references embedded in titles, branch names, and commit
/// messages, e.g. `PROJ-123` (spec §4.4 "Link pull requests to work items").
static WORK_ITEM_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][A-Z0-9]{1,9}-\d+\b").expect("valid regex"));

pub struct TransformWorker {
    raw_batches: RawBatchRepository,
    bus: Arc<dyn QueueBus>,
    scheduler: Scheduler,
    broker: Broker,
}

impl TransformWorker {
    pub fn new(raw_batches: RawBatchRepository, bus: Arc<dyn QueueBus>, scheduler: Scheduler, broker: Broker) -> Self {
        Self { raw_batches, bus, scheduler, broker }
    }

    #[instrument(skip(self, message), fields(job_id = message.job_id, batch_id = %message.batch_id))]
    async fn normalize(&self, message: &TransformMessage) -> Result<(EntityDrafts, Vec<String>), String> {
        let batch = self
            .raw_batches
            .get(message.tenant_id, message.batch_id)
            .await
            .map_err(|e| e.to_string())?;

        let (drafts, warnings) = match batch.kind.as_str() {
            "issue_tracker_page" => normalize_issue_tracker_page(message.tenant_id, &batch.payload),
            "source_control_page" => normalize_source_control_page(message.tenant_id, &batch.payload),
            other => return Err(format!("unrecognized batch kind '{other}'")),
        };

        self.raw_batches
            .mark_consumed(message.tenant_id, message.batch_id)
            .await
            .map_err(|e| e.to_string())?;

        Ok((drafts, warnings))
    }

    /// Closes this message's unit in the run's in-flight batch counter,
    /// opening `fanned_out` new ones (0 or 1 Load message); finalizes the
    /// run if this was the last one open (spec §4.3 step 5).
    async fn close_batch(&self, transform: &TransformMessage, fanned_out: i64) {
        if self.scheduler.run_tracker().close_and_open(transform.job_id, fanned_out) {
            finalize_run(&self.scheduler, &self.broker, transform.job_id, transform.tenant_id, &transform.job_name)
                .await;
        }
    }
}

#[async_trait]
impl MessageHandler for TransformWorker {
    async fn handle(&self, message: ClaimedMessage) -> Disposition {
        let transform: TransformMessage = match serde_json::from_value(message.payload) {
            Ok(m) => m,
            Err(e) => return Disposition::DeadLetter(format!("malformed transform message: {e}")),
        };

        let (drafts, warnings) = match self.normalize(&transform).await {
            Ok(v) => v,
            Err(reason) => {
                self.close_batch(&transform, 0).await;
                return Disposition::DeadLetter(reason);
            }
        };

        for warning in &warnings {
            self.broker.publish(
                transform.tenant_id,
                PipelineEvent::progress(transform.job_name.clone(), None, warning.clone()),
            );
        }

        if drafts.is_empty() {
            self.close_batch(&transform, 0).await;
            return Disposition::Ack;
        }

        let load = LoadMessage {
            tenant_id: transform.tenant_id,
            job_id: transform.job_id,
            job_name: transform.job_name.clone(),
            batch_id: transform.batch_id,
            entities: drafts,
        };

        match self
            .bus
            .publish(Queue::Load, transform.tenant_id, serde_json::to_value(&load).unwrap_or_default())
            .await
        {
            Ok(_) => {
                self.close_batch(&transform, 1).await;
                Disposition::Ack
            }
            Err(e) => Disposition::Retry(e.to_string()),
        }
    }
}

fn normalize_issue_tracker_page(tenant_id: i64, payload: &Value) -> (EntityDrafts, Vec<String>) {
    let mut drafts = EntityDrafts::default();
    let mut warnings = Vec::new();
    let now = Utc::now();

    let Some(items) = payload.get("items").and_then(Value::as_array) else {
        return (drafts, warnings);
    };

    for item in items {
        let external_key = match item.get("key").and_then(Value::as_str) {
            Some(k) => k.to_string(),
            None => {
                warn!("issue-tracker item missing 'key', skipping");
                continue;
            }
        };

        if let Some(project_key) = item.get("project").and_then(Value::as_str) {
            drafts.projects.push(Project {
                tenant_id,
                external_key: project_key.to_string(),
                name: item
                    .get("project_name")
                    .and_then(Value::as_str)
                    .unwrap_or(project_key)
                    .to_string(),
                updated_at: now,
            });
        }

        if let Some(assignee) = item.get("assignee").and_then(Value::as_object) {
            if let Some(id) = assignee.get("id").and_then(Value::as_str) {
                drafts.users.push(CanonicalUser {
                    tenant_id,
                    external_id: id.to_string(),
                    display_name: assignee
                        .get("display_name")
                        .and_then(Value::as_str)
                        .unwrap_or(id)
                        .to_string(),
                    email: assignee.get("email").and_then(Value::as_str).map(str::to_string),
                    updated_at: now,
                });
            }
        }

        let workflow_key = item
            .get("workflow")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string();
        drafts.workflows.push(Workflow {
            tenant_id,
            external_key: workflow_key.clone(),
            name: workflow_key.clone(),
        });

        let status_key = item
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let canonical_state = canonical_state_for(&status_key);
        if canonical_state == CanonicalState::Unmapped {
            warnings.push(format!(
                "{external_key}: status '{status_key}' has no canonical mapping, recorded as unmapped"
            ));
        }
        drafts.statuses.push(Status {
            tenant_id,
            external_key: status_key.clone(),
            canonical_state,
        });
        drafts.status_mappings.push(StatusMapping {
            tenant_id,
            workflow_external_key: workflow_key.clone(),
            external_status: status_key.clone(),
            canonical_state,
        });

        let (metrics, parse_error) = match item.get("changelog") {
            None => (WorkflowMetrics::default(), None),
            Some(Value::Array(changelog)) => (compute_workflow_metrics(changelog), None),
            Some(_) => {
                let reason = "changelog is not an array".to_string();
                warn!(external_key, "{reason}");
                warnings.push(format!("{external_key}: {reason}, recorded with parse-error marker"));
                (WorkflowMetrics::default(), Some(reason))
            }
        };

        let updated_at = parse_timestamp(item.get("updated_at")).unwrap_or(now);

        drafts.work_items.push(WorkItem {
            tenant_id,
            external_key,
            project_external_key: item.get("project").and_then(Value::as_str).unwrap_or_default().to_string(),
            assignee_external_id: item
                .get("assignee")
                .and_then(Value::as_object)
                .and_then(|a| a.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            status_external_key: status_key,
            workflow_external_key: workflow_key,
            priority: item.get("priority").and_then(Value::as_str).map(str::to_string),
            summary: item.get("summary").and_then(Value::as_str).unwrap_or_default().to_string(),
            description: item.get("description").and_then(Value::as_str).map(str::to_string),
            acceptance_criteria: item
                .get("acceptance_criteria")
                .and_then(Value::as_str)
                .map(str::to_string),
            metrics,
            parse_error,
            updated_at,
        });
    }

    (drafts, warnings)
}

fn normalize_source_control_page(tenant_id: i64, payload: &Value) -> (EntityDrafts, Vec<String>) {
    let mut drafts = EntityDrafts::default();
    let mut warnings = Vec::new();

    let resource_kind = payload.get("resource_kind").and_then(Value::as_str).unwrap_or("");
    let repository = payload.get("repository").and_then(Value::as_str).unwrap_or("unknown-repo");
    let Some(items) = payload.get("items").and_then(Value::as_array) else {
        return (drafts, warnings);
    };

    match resource_kind {
        "pulls" => normalize_pull_requests(tenant_id, repository, items, &mut drafts),
        "commits" | "reviews" | "comments" | "threads" => {
            normalize_pr_text_links(tenant_id, items, &mut drafts)
        }
        other => {
            warn!(resource_kind = other, "unrecognized source-control resource kind");
            warnings.push(format!("unrecognized source-control resource kind '{other}'"));
        }
    }

    (drafts, warnings)
}

fn normalize_pull_requests(tenant_id: i64, repository: &str, items: &[Value], drafts: &mut EntityDrafts) {
    let now = Utc::now();
    for item in items {
        let Some(external_id) = item.get("id").and_then(value_as_id_string) else {
            warn!("pull-request item missing 'id', skipping");
            continue;
        };

        let title = item.get("title").and_then(Value::as_str).unwrap_or_default();
        let branch = item.get("branch").and_then(Value::as_str).unwrap_or_default();
        let linked_work_item_keys = extract_work_item_keys(&[title, branch]);

        for key in &linked_work_item_keys {
            drafts.links.push(WorkItemPullRequestLink {
                tenant_id,
                work_item_external_key: key.clone(),
                pull_request_external_id: external_id.clone(),
            });
        }

        drafts.pull_requests.push(PullRequest {
            tenant_id,
            external_id,
            repository: repository.to_string(),
            author_external_id: item.get("author").and_then(Value::as_str).map(str::to_string),
            opened_at: parse_timestamp(item.get("opened_at")),
            merged_at: parse_timestamp(item.get("merged_at")),
            closed_at: parse_timestamp(item.get("closed_at")),
            linked_work_item_keys,
            updated_at: parse_timestamp(item.get("updated_at")).unwrap_or(now),
        });
    }
}

/// Commits, reviews, comments, and threads never mint new `PullRequest`
/// rows (they carry no PR metadata beyond an association); they only
/// contribute additional work-item links when their text references one
/// and the item names the PR it belongs to.
fn normalize_pr_text_links(tenant_id: i64, items: &[Value], drafts: &mut EntityDrafts) {
    for item in items {
        let Some(pull_request_external_id) = item.get("pull_request_id").and_then(value_as_id_string) else {
            continue;
        };
        let text = item
            .get("message")
            .or_else(|| item.get("body"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        for key in extract_work_item_keys(&[text]) {
            drafts.links.push(WorkItemPullRequestLink {
                tenant_id,
                work_item_external_key: key,
                pull_request_external_id: pull_request_external_id.clone(),
            });
        }
    }
}

fn value_as_id_string(v: &Value) -> Option<String> {
    v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string()))
}

fn extract_work_item_keys(texts: &[&str]) -> Vec<String> {
    let mut keys: Vec<String> = texts
        .iter()
        .flat_map(|t| WORK_ITEM_KEY.find_iter(t).map(|m| m.as_str().to_string()))
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

fn canonical_state_for(status_key: &str) -> CanonicalState {
    let lower = status_key.to_lowercase();
    if lower.contains("done") || lower.contains("closed") || lower.contains("resolved") {
        CanonicalState::Done
    } else if lower.contains("progress") || lower.contains("review") {
        CanonicalState::InProgress
    } else if lower.contains("todo") || lower.contains("open") || lower.contains("backlog") {
        CanonicalState::Todo
    } else {
        CanonicalState::Unmapped
    }
}

/// Lead time, work-start count, and rework detection from a changelog of
/// `{"to_status": "...", "at": "..."}` transitions (spec §4.4).
fn compute_workflow_metrics(changelog: &[Value]) -> WorkflowMetrics {
    let mut work_starts = 0u32;
    let mut first_in_progress: Option<DateTime<Utc>> = None;
    let mut completed_at: Option<DateTime<Utc>> = None;
    let mut reached_done_once = false;
    let mut rework_indicator = false;
    let mut distinct_assignees = std::collections::HashSet::new();

    for transition in changelog {
        let to_status = transition.get("to_status").and_then(Value::as_str).unwrap_or_default();
        let at = parse_timestamp(transition.get("at"));
        if let Some(assignee) = transition.get("assignee").and_then(Value::as_str) {
            distinct_assignees.insert(assignee.to_string());
        }

        let state = canonical_state_for(to_status);
        match state {
            CanonicalState::InProgress => {
                if reached_done_once {
                    rework_indicator = true;
                }
                work_starts += 1;
                if first_in_progress.is_none() {
                    first_in_progress = at;
                }
            }
            CanonicalState::Done => {
                reached_done_once = true;
                completed_at = at;
            }
            _ => {}
        }
    }

    let lead_time_minutes = match (first_in_progress, completed_at) {
        (Some(start), Some(end)) if end >= start => Some((end - start).num_minutes()),
        _ => None,
    };

    let workflow_complexity_score = (changelog.len() as f64).sqrt() + distinct_assignees.len() as f64;

    WorkflowMetrics {
        lead_time_minutes,
        work_starts,
        rework_indicator,
        workflow_complexity_score,
    }
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_work_item_keys_from_title_and_branch() {
        let keys = extract_work_item_keys(&["Fix login bug PROJ-42", "feature/proj-99-other"]);
        assert_eq!(keys, vec!["PROJ-42".to_string()]);
    }

    #[test]
    fn canonical_state_maps_common_status_names() {
        assert_eq!(canonical_state_for("Done"), CanonicalState::Done);
        assert_eq!(canonical_state_for("In Progress"), CanonicalState::InProgress);
        assert_eq!(canonical_state_for("Backlog"), CanonicalState::Todo);
        assert_eq!(canonical_state_for("Weird Custom State"), CanonicalState::Unmapped);
    }

    #[test]
    fn workflow_metrics_compute_lead_time_and_rework() {
        let changelog = serde_json::json!([
            {"to_status": "To Do", "at": "2026-01-01T00:00:00Z"},
            {"to_status": "In Progress", "at": "2026-01-01T01:00:00Z"},
            {"to_status": "Done", "at": "2026-01-01T03:00:00Z"},
            {"to_status": "In Progress", "at": "2026-01-02T00:00:00Z"},
        ]);
        let metrics = compute_workflow_metrics(changelog.as_array().unwrap());
        assert_eq!(metrics.lead_time_minutes, Some(120));
        assert_eq!(metrics.work_starts, 2);
        assert!(metrics.rework_indicator);
    }

    #[test]
    fn normalize_issue_tracker_page_builds_work_item_with_project_and_user() {
        let payload = serde_json::json!({
            "items": [{
                "key": "PROJ-1",
                "project": "PROJ",
                "status": "In Progress",
                "workflow": "default",
                "summary": "Do the thing",
                "assignee": {"id": "u1", "display_name": "Ada"},
                "updated_at": "2026-01-01T00:00:00Z",
            }]
        });
        let (drafts, warnings) = normalize_issue_tracker_page(1, &payload);
        assert_eq!(drafts.work_items.len(), 1);
        assert_eq!(drafts.work_items[0].external_key, "PROJ-1");
        assert_eq!(drafts.users.len(), 1);
        assert_eq!(drafts.projects.len(), 1);
        assert!(warnings.is_empty());
    }

    #[test]
    fn normalize_source_control_pulls_links_work_items_from_title() {
        let payload = serde_json::json!({
            "resource_kind": "pulls",
            "repository": "org/repo",
            "items": [{
                "id": 7,
                "title": "Fixes PROJ-1",
                "branch": "fix/proj-1",
                "author": "ada",
                "updated_at": "2026-01-01T00:00:00Z",
            }]
        });
        let (drafts, _) = normalize_source_control_page(1, &payload);
        assert_eq!(drafts.pull_requests.len(), 1);
        assert_eq!(drafts.links.len(), 1);
        assert_eq!(drafts.links[0].work_item_external_key, "PROJ-1");
    }

    #[test]
    fn malformed_item_is_skipped_without_aborting_the_rest_of_the_page() {
        let payload = serde_json::json!({
            "items": [
                {"no_key_here": true},
                {
                    "key": "PROJ-2",
                    "project": "PROJ",
                    "status": "Done",
                    "workflow": "default",
                    "summary": "Do the other thing",
                    "updated_at": "2026-01-01T00:00:00Z",
                },
            ]
        });
        let (drafts, _) = normalize_issue_tracker_page(1, &payload);
        assert_eq!(drafts.work_items.len(), 1, "the item missing 'key' is skipped, not fatal to the page");
        assert_eq!(drafts.work_items[0].external_key, "PROJ-2");
    }

    #[test]
    fn unrecognized_resource_kind_yields_empty_drafts() {
        let payload = serde_json::json!({"resource_kind": "mystery", "items": []});
        let (drafts, warnings) = normalize_source_control_page(1, &payload);
        assert!(drafts.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn changelog_present_but_not_array_is_recorded_with_parse_error_marker() {
        let payload = serde_json::json!({
            "items": [{
                "key": "PROJ-3",
                "project": "PROJ",
                "status": "Done",
                "workflow": "default",
                "summary": "Malformed changelog",
                "changelog": "not-an-array",
                "updated_at": "2026-01-01T00:00:00Z",
            }]
        });
        let (drafts, warnings) = normalize_issue_tracker_page(1, &payload);
        assert_eq!(drafts.work_items.len(), 1, "item is still persisted despite the malformed field");
        assert!(drafts.work_items[0].parse_error.is_some());
        assert!(warnings.iter().any(|w| w.contains("parse-error")));
    }

    #[test]
    fn unmapped_status_is_recorded_with_a_warning_but_never_dropped() {
        let payload = serde_json::json!({
            "items": [{
                "key": "PROJ-4",
                "project": "PROJ",
                "status": "Weird Custom State",
                "workflow": "default",
                "summary": "Has an unmapped status",
                "updated_at": "2026-01-01T00:00:00Z",
            }]
        });
        let (drafts, warnings) = normalize_issue_tracker_page(1, &payload);
        assert_eq!(drafts.work_items.len(), 1);
        assert_eq!(drafts.statuses[0].canonical_state, CanonicalState::Unmapped);
        assert!(warnings.iter().any(|w| w.contains("unmapped")));
    }
}
