//! Canonical entities produced by the Transform Worker and upserted by the
//! Load Worker (spec §3 "Canonical entities"). Every entity carries
//! `tenant_id`; every cross-entity reference resolves within the same
//! tenant (invariant, spec §3 and §8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tenant::TenantScoped;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub tenant_id: i64,
    pub external_key: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

impl TenantScoped for Project {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalUser {
    pub tenant_id: i64,
    pub external_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TenantScoped for CanonicalUser {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}

/// A canonical status, e.g. "In Progress", mapped from one or more external
/// status strings via `StatusMapping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub tenant_id: i64,
    pub external_key: String,
    pub canonical_state: CanonicalState,
}

/// Canonical workflow states every mapped status resolves to. Unmapped
/// external statuses resolve to `Unmapped` (spec §4.4 normalization duties).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalState {
    Todo,
    InProgress,
    Done,
    Unmapped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub tenant_id: i64,
    pub external_key: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMapping {
    pub tenant_id: i64,
    pub workflow_external_key: String,
    pub external_status: String,
    pub canonical_state: CanonicalState,
}

/// Workflow-derived metrics computed by the Transform Worker from the
/// changelog (spec §4.4 normalization duties).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowMetrics {
    /// Minutes between first "in progress" transition and completion.
    pub lead_time_minutes: Option<i64>,
    /// Count of distinct transitions into an in-progress state.
    pub work_starts: u32,
    /// True if the item transitioned out of and back into an in-progress
    /// state after reaching a done-like state.
    pub rework_indicator: bool,
    /// Heuristic complexity score derived from transition count and
    /// distinct assignees touched.
    pub workflow_complexity_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub tenant_id: i64,
    /// Unique per tenant (spec §3).
    pub external_key: String,
    pub project_external_key: String,
    pub assignee_external_id: Option<String>,
    pub status_external_key: String,
    pub workflow_external_key: String,
    pub priority: Option<String>,
    pub summary: String,
    pub description: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub metrics: WorkflowMetrics,
    /// Set when a per-entity normalization error occurred (spec §4.4,
    /// §7 "Parse" class): the entity is still loaded, never dropped.
    pub parse_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TenantScoped for WorkItem {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub tenant_id: i64,
    pub external_id: String,
    pub repository: String,
    pub author_external_id: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Work-item external keys parsed from title/branch/commit messages
    /// (spec §4.4 "Link pull requests to work items").
    pub linked_work_item_keys: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl TenantScoped for PullRequest {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}

/// WorkItem <-> PullRequest association (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemPullRequestLink {
    pub tenant_id: i64,
    pub work_item_external_key: String,
    pub pull_request_external_id: String,
}

impl TenantScoped for WorkItemPullRequestLink {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}

/// A batch of canonical drafts produced by one `transform` message
/// (spec §4.4 contract: "emits one `load{tenant, batch_id, entities}`").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityDrafts {
    pub projects: Vec<Project>,
    pub users: Vec<CanonicalUser>,
    pub workflows: Vec<Workflow>,
    pub statuses: Vec<Status>,
    pub status_mappings: Vec<StatusMapping>,
    pub work_items: Vec<WorkItem>,
    pub pull_requests: Vec<PullRequest>,
    pub links: Vec<WorkItemPullRequestLink>,
}

impl EntityDrafts {
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
            && self.users.is_empty()
            && self.workflows.is_empty()
            && self.statuses.is_empty()
            && self.status_mappings.is_empty()
            && self.work_items.is_empty()
            && self.pull_requests.is_empty()
            && self.links.is_empty()
    }
}
