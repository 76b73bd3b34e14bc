//! Canonical entity upserts under tenant-scoped transactions (spec §4.5).
//!
//! Upsert ordering within a batch: projects → users → workflows/statuses/
//! mappings → work items → pull requests → links. Within a tier, insert
//! order matches payload order. Foreign keys are resolved by
//! `(tenant_id, external_key)` lookups inside the same transaction; a
//! missing referent defers the entity up to `MAX_DEFERRED_PASSES` times,
//! after which it loads with a null reference and a warning.

use ingestflow_core::entities::*;
use ingestflow_core::vector::EntityKind;
use sqlx::{PgConnection, Row};
use tracing::{instrument, warn};

use crate::database::Database;
use crate::error::Result;

/// spec §4.5: "After N=3 deferred passes the entity is loaded with a null
/// reference and a warning."
pub const MAX_DEFERRED_PASSES: i32 = 3;

#[derive(Clone)]
pub struct EntityRepository {
    db: Database,
}

/// Text fields changed for an entity whose vector may now be stale
/// (spec §4.5: "emit vectorize ... for entities whose text fields changed").
#[derive(Debug, Clone)]
pub struct TextChange {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub text_fingerprint: String,
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub text_changes: Vec<TextChange>,
    /// Soft-error progress messages (spec §4.5 "a soft-error progress event
    /// is emitted" / §4.4 parse-error markers surfaced from upstream).
    pub warnings: Vec<String>,
}

impl EntityRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert an entire batch's entity drafts in dependency-tier order,
    /// inside one tenant-scoped transaction (spec §4.5 "Ordering and
    /// tie-breaks").
    #[instrument(skip(self, drafts))]
    pub async fn load_batch(&self, tenant_id: i64, drafts: &EntityDrafts) -> Result<LoadOutcome> {
        let mut tx = self.db.pool().begin().await?;
        let mut outcome = LoadOutcome::default();

        for project in &drafts.projects {
            upsert_project(&mut tx, tenant_id, project).await?;
        }
        for user in &drafts.users {
            upsert_user(&mut tx, tenant_id, user).await?;
        }
        for workflow in &drafts.workflows {
            upsert_workflow(&mut tx, tenant_id, workflow).await?;
        }
        for status in &drafts.statuses {
            upsert_status(&mut tx, tenant_id, status).await?;
        }
        for mapping in &drafts.status_mappings {
            upsert_status_mapping(&mut tx, tenant_id, mapping).await?;
        }
        for item in &drafts.work_items {
            if let Some(change) = upsert_work_item(&mut tx, tenant_id, item, &mut outcome).await? {
                outcome.text_changes.push(change);
            }
        }
        for pr in &drafts.pull_requests {
            if let Some(change) = upsert_pull_request(&mut tx, tenant_id, pr, &mut outcome).await? {
                outcome.text_changes.push(change);
            }
        }
        for link in &drafts.links {
            upsert_link(&mut tx, tenant_id, link, &mut outcome).await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Source text for an entity at vectorize time (spec §4.6), built the
    /// same way `upsert_work_item_unconditional`/`upsert_pull_request_unconditional`
    /// derive `text_fingerprint` so a fingerprint comparison against either
    /// path agrees. `None` if the entity no longer exists.
    #[instrument(skip(self))]
    pub async fn get_text(
        &self,
        tenant_id: i64,
        entity_kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<String>> {
        match entity_kind {
            EntityKind::WorkItem => {
                let row = sqlx::query(
                    "SELECT summary, description, acceptance_criteria FROM work_items WHERE tenant_id = $1 AND external_key = $2",
                )
                .bind(tenant_id)
                .bind(entity_id)
                .fetch_optional(self.db.pool())
                .await?;
                Ok(row.map(|r| {
                    let summary: String = r.get("summary");
                    let description: Option<String> = r.get("description");
                    let acceptance_criteria: Option<String> = r.get("acceptance_criteria");
                    format!(
                        "{}\n{}\n{}",
                        summary,
                        description.as_deref().unwrap_or(""),
                        acceptance_criteria.as_deref().unwrap_or("")
                    )
                }))
            }
            EntityKind::PullRequest => {
                let row = sqlx::query("SELECT repository FROM pull_requests WHERE tenant_id = $1 AND external_id = $2")
                    .bind(tenant_id)
                    .bind(entity_id)
                    .fetch_optional(self.db.pool())
                    .await?;
                Ok(row.map(|r| r.get::<String, _>("repository")))
            }
        }
    }

    /// Re-attempt deferred entities (spec §4.5: up to 3 passes). Run
    /// periodically by the Load Worker, independent of any single batch.
    #[instrument(skip(self))]
    pub async fn process_deferred(&self) -> Result<LoadOutcome> {
        let mut outcome = LoadOutcome::default();
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, entity_table, payload, missing_reference, attempts
            FROM deferred_entities
            ORDER BY created_at
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        for row in rows {
            let id: i64 = row.get("id");
            let tenant_id: i64 = row.get("tenant_id");
            let entity_table: String = row.get("entity_table");
            let payload: serde_json::Value = row.get("payload");
            let missing_reference: String = row.get("missing_reference");
            let attempts: i32 = row.get("attempts");

            let mut tx = self.db.pool().begin().await?;
            let resolved = reference_exists(&mut tx, tenant_id, &missing_reference).await?;

            if resolved || attempts + 1 >= MAX_DEFERRED_PASSES {
                if !resolved {
                    outcome.warnings.push(format!(
                        "{entity_table} deferred entity {id}: loading with null reference after {MAX_DEFERRED_PASSES} passes"
                    ));
                    warn!(entity_table, id, "loading deferred entity with null reference");
                }
                match entity_table.as_str() {
                    "work_items" => {
                        let item: WorkItem = serde_json::from_value(payload)?;
                        if let Some(change) =
                            upsert_work_item_unconditional(&mut tx, tenant_id, &item, resolved).await?
                        {
                            outcome.text_changes.push(change);
                        }
                    }
                    "pull_requests" => {
                        let pr: PullRequest = serde_json::from_value(payload)?;
                        if let Some(change) =
                            upsert_pull_request_unconditional(&mut tx, tenant_id, &pr, resolved).await?
                        {
                            outcome.text_changes.push(change);
                        }
                    }
                    other => {
                        warn!(entity_table = other, "unknown deferred entity table, dropping");
                    }
                }
                sqlx::query("DELETE FROM deferred_entities WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            } else {
                sqlx::query("UPDATE deferred_entities SET attempts = attempts + 1 WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
        }

        Ok(outcome)
    }
}

async fn reference_exists(tx: &mut PgConnection, tenant_id: i64, reference: &str) -> Result<bool> {
    // reference is "table:key", e.g. "projects:PROJ-1"
    let (table, key) = reference.split_once(':').unwrap_or((reference, ""));
    let query = match table {
        "projects" => "SELECT 1 FROM projects WHERE tenant_id = $1 AND external_key = $2",
        "users" => "SELECT 1 FROM users WHERE tenant_id = $1 AND external_id = $2",
        "work_items" => "SELECT 1 FROM work_items WHERE tenant_id = $1 AND external_key = $2",
        "pull_requests" => "SELECT 1 FROM pull_requests WHERE tenant_id = $1 AND external_id = $2",
        _ => return Ok(false),
    };
    let row = sqlx::query(query)
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;
    Ok(row.is_some())
}

async fn defer(
    tx: &mut PgConnection,
    tenant_id: i64,
    entity_table: &str,
    payload: &impl serde::Serialize,
    missing_reference: &str,
    outcome: &mut LoadOutcome,
) -> Result<()> {
    let payload_json = serde_json::to_value(payload)?;
    sqlx::query(
        r#"
        INSERT INTO deferred_entities (tenant_id, entity_table, payload, missing_reference, attempts, created_at)
        VALUES ($1, $2, $3, $4, 0, NOW())
        "#,
    )
    .bind(tenant_id)
    .bind(entity_table)
    .bind(payload_json)
    .bind(missing_reference)
    .execute(&mut *tx)
    .await?;

    outcome.warnings.push(format!(
        "{entity_table} entity deferred: missing referent {missing_reference}"
    ));
    Ok(())
}

async fn upsert_project(tx: &mut PgConnection, tenant_id: i64, project: &Project) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO projects (tenant_id, external_key, name, updated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (tenant_id, external_key) DO UPDATE SET
            name = EXCLUDED.name,
            updated_at = GREATEST(projects.updated_at, EXCLUDED.updated_at)
        WHERE EXCLUDED.updated_at >= projects.updated_at
        "#,
    )
    .bind(tenant_id)
    .bind(&project.external_key)
    .bind(&project.name)
    .bind(project.updated_at)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

async fn upsert_user(tx: &mut PgConnection, tenant_id: i64, user: &CanonicalUser) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (tenant_id, external_id, display_name, email, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (tenant_id, external_id) DO UPDATE SET
            display_name = EXCLUDED.display_name,
            email = COALESCE(EXCLUDED.email, users.email),
            updated_at = GREATEST(users.updated_at, EXCLUDED.updated_at)
        WHERE EXCLUDED.updated_at >= users.updated_at
        "#,
    )
    .bind(tenant_id)
    .bind(&user.external_id)
    .bind(&user.display_name)
    .bind(&user.email)
    .bind(user.updated_at)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

async fn upsert_workflow(tx: &mut PgConnection, tenant_id: i64, workflow: &Workflow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO workflows (tenant_id, external_key, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (tenant_id, external_key) DO UPDATE SET name = EXCLUDED.name
        "#,
    )
    .bind(tenant_id)
    .bind(&workflow.external_key)
    .bind(&workflow.name)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

async fn upsert_status(tx: &mut PgConnection, tenant_id: i64, status: &Status) -> Result<()> {
    let state = serde_json::to_value(status.canonical_state)?;
    sqlx::query(
        r#"
        INSERT INTO statuses (tenant_id, external_key, canonical_state)
        VALUES ($1, $2, $3)
        ON CONFLICT (tenant_id, external_key) DO UPDATE SET canonical_state = EXCLUDED.canonical_state
        "#,
    )
    .bind(tenant_id)
    .bind(&status.external_key)
    .bind(state)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

async fn upsert_status_mapping(
    tx: &mut PgConnection,
    tenant_id: i64,
    mapping: &StatusMapping,
) -> Result<()> {
    let state = serde_json::to_value(mapping.canonical_state)?;
    sqlx::query(
        r#"
        INSERT INTO status_mappings (tenant_id, workflow_external_key, external_status, canonical_state)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (tenant_id, workflow_external_key, external_status)
        DO UPDATE SET canonical_state = EXCLUDED.canonical_state
        "#,
    )
    .bind(tenant_id)
    .bind(&mapping.workflow_external_key)
    .bind(&mapping.external_status)
    .bind(state)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

async fn upsert_work_item(
    tx: &mut PgConnection,
    tenant_id: i64,
    item: &WorkItem,
    outcome: &mut LoadOutcome,
) -> Result<Option<TextChange>> {
    if !reference_exists(tx, tenant_id, &format!("projects:{}", item.project_external_key)).await? {
        defer(
            tx,
            tenant_id,
            "work_items",
            item,
            &format!("projects:{}", item.project_external_key),
            outcome,
        )
        .await?;
        return Ok(None);
    }
    upsert_work_item_unconditional(tx, tenant_id, item, true).await
}

async fn upsert_work_item_unconditional(
    tx: &mut PgConnection,
    tenant_id: i64,
    item: &WorkItem,
    project_resolved: bool,
) -> Result<Option<TextChange>> {
    let assignee = if project_resolved {
        match &item.assignee_external_id {
            Some(id) if reference_exists(tx, tenant_id, &format!("users:{id}")).await? => Some(id.clone()),
            _ => None,
        }
    } else {
        None
    };

    let metrics = serde_json::to_value(&item.metrics)?;
    let text = format!(
        "{}\n{}\n{}",
        item.summary,
        item.description.as_deref().unwrap_or(""),
        item.acceptance_criteria.as_deref().unwrap_or("")
    );
    let fingerprint = ingestflow_core::vector::fingerprint(&text);

    let row = sqlx::query(
        r#"
        INSERT INTO work_items (
            tenant_id, external_key, project_external_key, assignee_external_id,
            status_external_key, workflow_external_key, priority, summary,
            description, acceptance_criteria, metrics, parse_error,
            text_fingerprint, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (tenant_id, external_key) DO UPDATE SET
            project_external_key = EXCLUDED.project_external_key,
            assignee_external_id = EXCLUDED.assignee_external_id,
            status_external_key = EXCLUDED.status_external_key,
            workflow_external_key = EXCLUDED.workflow_external_key,
            priority = COALESCE(EXCLUDED.priority, work_items.priority),
            summary = EXCLUDED.summary,
            description = COALESCE(EXCLUDED.description, work_items.description),
            acceptance_criteria = COALESCE(EXCLUDED.acceptance_criteria, work_items.acceptance_criteria),
            metrics = EXCLUDED.metrics,
            parse_error = EXCLUDED.parse_error,
            text_fingerprint = EXCLUDED.text_fingerprint,
            updated_at = GREATEST(work_items.updated_at, EXCLUDED.updated_at)
        WHERE EXCLUDED.updated_at >= work_items.updated_at
        RETURNING (xmax = 0) AS inserted, text_fingerprint
        "#,
    )
    .bind(tenant_id)
    .bind(&item.external_key)
    .bind(&item.project_external_key)
    .bind(&assignee)
    .bind(&item.status_external_key)
    .bind(&item.workflow_external_key)
    .bind(&item.priority)
    .bind(&item.summary)
    .bind(&item.description)
    .bind(&item.acceptance_criteria)
    .bind(metrics)
    .bind(&item.parse_error)
    .bind(&fingerprint)
    .bind(item.updated_at)
    .fetch_optional(&mut *tx)
    .await?;

    Ok(row.map(|_| TextChange {
        entity_kind: EntityKind::WorkItem,
        entity_id: item.external_key.clone(),
        text_fingerprint: fingerprint,
    }))
}

async fn upsert_pull_request(
    tx: &mut PgConnection,
    tenant_id: i64,
    pr: &PullRequest,
    outcome: &mut LoadOutcome,
) -> Result<Option<TextChange>> {
    upsert_pull_request_unconditional(tx, tenant_id, pr, true).await
        .map(|r| { let _ = outcome; r })
}

async fn upsert_pull_request_unconditional(
    tx: &mut PgConnection,
    tenant_id: i64,
    pr: &PullRequest,
    author_resolved: bool,
) -> Result<Option<TextChange>> {
    let author = if author_resolved {
        match &pr.author_external_id {
            Some(id) if reference_exists(tx, tenant_id, &format!("users:{id}")).await? => Some(id.clone()),
            _ => None,
        }
    } else {
        None
    };

    let linked = serde_json::to_value(&pr.linked_work_item_keys)?;
    let fingerprint = ingestflow_core::vector::fingerprint(&pr.repository);

    let row = sqlx::query(
        r#"
        INSERT INTO pull_requests (
            tenant_id, external_id, repository, author_external_id,
            opened_at, merged_at, closed_at, linked_work_item_keys,
            text_fingerprint, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (tenant_id, external_id) DO UPDATE SET
            repository = EXCLUDED.repository,
            author_external_id = EXCLUDED.author_external_id,
            opened_at = COALESCE(EXCLUDED.opened_at, pull_requests.opened_at),
            merged_at = COALESCE(EXCLUDED.merged_at, pull_requests.merged_at),
            closed_at = COALESCE(EXCLUDED.closed_at, pull_requests.closed_at),
            linked_work_item_keys = EXCLUDED.linked_work_item_keys,
            text_fingerprint = EXCLUDED.text_fingerprint,
            updated_at = GREATEST(pull_requests.updated_at, EXCLUDED.updated_at)
        WHERE EXCLUDED.updated_at >= pull_requests.updated_at
        RETURNING external_id
        "#,
    )
    .bind(tenant_id)
    .bind(&pr.external_id)
    .bind(&pr.repository)
    .bind(&author)
    .bind(pr.opened_at)
    .bind(pr.merged_at)
    .bind(pr.closed_at)
    .bind(linked)
    .bind(&fingerprint)
    .bind(pr.updated_at)
    .fetch_optional(&mut *tx)
    .await?;

    Ok(row.map(|_| TextChange {
        entity_kind: EntityKind::PullRequest,
        entity_id: pr.external_id.clone(),
        text_fingerprint: fingerprint,
    }))
}

async fn upsert_link(
    tx: &mut PgConnection,
    tenant_id: i64,
    link: &WorkItemPullRequestLink,
    outcome: &mut LoadOutcome,
) -> Result<()> {
    let work_item_ok =
        reference_exists(tx, tenant_id, &format!("work_items:{}", link.work_item_external_key)).await?;
    let pr_ok =
        reference_exists(tx, tenant_id, &format!("pull_requests:{}", link.pull_request_external_id)).await?;

    if !work_item_ok || !pr_ok {
        outcome.warnings.push(format!(
            "skipping work item/pull request link {}<->{}: referent not yet loaded",
            link.work_item_external_key, link.pull_request_external_id
        ));
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO work_item_pull_requests (tenant_id, work_item_external_key, pull_request_external_id)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(tenant_id)
    .bind(&link.work_item_external_key)
    .bind(&link.pull_request_external_id)
    .execute(&mut *tx)
    .await?;

    Ok(())
}
