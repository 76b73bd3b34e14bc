//! `VectorStore`: Postgres-backed default (spec §9 design note: "no
//! dedicated vector database is assumed; a `VectorStore` trait abstracts the
//! embedding index so a pgvector-style default and a dedicated vector
//! database are both valid implementations"). Enforces "exactly one current
//! vector per `(tenant_id, entity_kind, entity_id, embedding_model)`" (spec
//! §3).

use async_trait::async_trait;
use ingestflow_core::vector::{EntityKind, VectorRecord};
use sqlx::Row;
use tracing::instrument;

use crate::database::Database;
use crate::error::Result;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replace the current vector for `(tenant_id, entity_kind, entity_id,
    /// embedding_model)`, if any (spec §4.6: "replaced, never appended").
    async fn upsert(&self, record: VectorRecord) -> Result<()>;

    /// Current fingerprint for the skip-check (spec §4.6: "compute
    /// fingerprint; if unchanged since last vector, skip"). `None` if no
    /// vector has ever been stored for this entity+model.
    async fn current_fingerprint(
        &self,
        tenant_id: i64,
        entity_kind: EntityKind,
        entity_id: &str,
        embedding_model: &str,
    ) -> Result<Option<String>>;

    async fn get(
        &self,
        tenant_id: i64,
        entity_kind: EntityKind,
        entity_id: &str,
        embedding_model: &str,
    ) -> Result<Option<VectorRecord>>;

    async fn delete(&self, tenant_id: i64, entity_kind: EntityKind, entity_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct PostgresVectorStore {
    db: Database,
}

impl PostgresVectorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VectorStore for PostgresVectorStore {
    #[instrument(skip(self, record), fields(entity_id = %record.entity_id))]
    async fn upsert(&self, record: VectorRecord) -> Result<()> {
        let kind = record.entity_kind.to_string();
        // pgvector's `vector` type accepts the textual `[f1,f2,...]` form;
        // the raw f32 slice is sent as that literal rather than a binary
        // array bind, matching the corpus's vector crate usage.
        let vector_literal = format_vector_literal(&record.vector);

        sqlx::query(
            r#"
            INSERT INTO vector_records (
                tenant_id, entity_kind, entity_id, embedding_model,
                dimension, embedding, text_fingerprint, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6::vector, $7, NOW())
            ON CONFLICT (tenant_id, entity_kind, entity_id, embedding_model) DO UPDATE SET
                dimension = EXCLUDED.dimension,
                embedding = EXCLUDED.embedding,
                text_fingerprint = EXCLUDED.text_fingerprint,
                updated_at = NOW()
            "#,
        )
        .bind(record.tenant_id)
        .bind(kind)
        .bind(&record.entity_id)
        .bind(&record.embedding_model)
        .bind(record.dimension as i32)
        .bind(vector_literal)
        .bind(&record.text_fingerprint)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn current_fingerprint(
        &self,
        tenant_id: i64,
        entity_kind: EntityKind,
        entity_id: &str,
        embedding_model: &str,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT text_fingerprint FROM vector_records
            WHERE tenant_id = $1 AND entity_kind = $2 AND entity_id = $3 AND embedding_model = $4
            "#,
        )
        .bind(tenant_id)
        .bind(entity_kind.to_string())
        .bind(entity_id)
        .bind(embedding_model)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|r| r.get("text_fingerprint")))
    }

    #[instrument(skip(self))]
    async fn get(
        &self,
        tenant_id: i64,
        entity_kind: EntityKind,
        entity_id: &str,
        embedding_model: &str,
    ) -> Result<Option<VectorRecord>> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, entity_kind, entity_id, embedding_model, dimension,
                   embedding::text AS embedding, text_fingerprint
            FROM vector_records
            WHERE tenant_id = $1 AND entity_kind = $2 AND entity_id = $3 AND embedding_model = $4
            "#,
        )
        .bind(tenant_id)
        .bind(entity_kind.to_string())
        .bind(entity_id)
        .bind(embedding_model)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            None => Ok(None),
            Some(r) => {
                let embedding_text: String = r.get("embedding");
                Ok(Some(VectorRecord {
                    tenant_id: r.get("tenant_id"),
                    entity_kind,
                    entity_id: r.get("entity_id"),
                    embedding_model: r.get("embedding_model"),
                    dimension: r.get::<i32, _>("dimension") as usize,
                    vector: parse_vector_literal(&embedding_text),
                    text_fingerprint: r.get("text_fingerprint"),
                }))
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, tenant_id: i64, entity_kind: EntityKind, entity_id: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM vector_records WHERE tenant_id = $1 AND entity_kind = $2 AND entity_id = $3",
        )
        .bind(tenant_id)
        .bind(entity_kind.to_string())
        .bind(entity_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

fn format_vector_literal(vector: &[f32]) -> String {
    let joined = vector
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{joined}]")
}

fn parse_vector_literal(text: &str) -> Vec<f32> {
    text.trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_literal_round_trips() {
        let original = vec![0.5_f32, -1.25, 3.0];
        let literal = format_vector_literal(&original);
        assert_eq!(literal, "[0.5,-1.25,3]");
        assert_eq!(parse_vector_literal(&literal), original);
    }
}
