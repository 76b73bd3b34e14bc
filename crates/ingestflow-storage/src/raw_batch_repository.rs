//! Raw Staging: append-only handoff buffer between Extract and Transform
//! (spec §2 component 3, §5 "Raw Staging is append-only; readers never
//! block writers").

use ingestflow_core::raw_batch::RawBatch;
use ingestflow_core::tenant::BatchId;
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};

#[derive(Clone)]
pub struct RawBatchRepository {
    db: Database,
}

impl RawBatchRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a page with a fresh `batch_id` (spec §4.3 step 4a).
    #[instrument(skip(self, payload))]
    pub async fn stage(
        &self,
        tenant_id: i64,
        integration_id: i64,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<BatchId> {
        let batch_id = BatchId::new();

        sqlx::query(
            r#"
            INSERT INTO raw_batches (tenant_id, integration_id, batch_id, kind, payload, received_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(tenant_id)
        .bind(integration_id)
        .bind(batch_id.0)
        .bind(kind)
        .bind(&payload)
        .execute(self.db.pool())
        .await?;

        Ok(batch_id)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, tenant_id: i64, batch_id: BatchId) -> Result<RawBatch> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, integration_id, batch_id, kind, payload, received_at, consumed_by_transform_at
            FROM raw_batches
            WHERE tenant_id = $1 AND batch_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(batch_id.0)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or(StoreError::RawBatchNotFound(batch_id.0))?;

        Ok(RawBatch {
            tenant_id: row.get("tenant_id"),
            integration_id: row.get("integration_id"),
            batch_id: BatchId(row.get::<Uuid, _>("batch_id")),
            kind: row.get("kind"),
            payload: row.get("payload"),
            received_at: row.get("received_at"),
            consumed_by_transform_at: row.get("consumed_by_transform_at"),
        })
    }

    #[instrument(skip(self))]
    pub async fn mark_consumed(&self, tenant_id: i64, batch_id: BatchId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE raw_batches
            SET consumed_by_transform_at = NOW()
            WHERE tenant_id = $1 AND batch_id = $2 AND consumed_by_transform_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(batch_id.0)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Garbage-collect batches older than the retention window (spec §3
    /// "Immutable; garbage-collected after a retention window").
    #[instrument(skip(self))]
    pub async fn delete_older_than(&self, retention_days: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM raw_batches WHERE received_at < NOW() - ($1 * INTERVAL '1 day')
            "#,
        )
        .bind(retention_days)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
