//! Integration catalog lookups (spec §3, §4.2). Credentials are handled
//! separately by `CredentialsStore`; this repository serves the
//! non-secret `kind`/`base_search`/`active` columns the Extract Worker
//! needs to pick and drive an adapter.

use ingestflow_core::integration::{Integration, IntegrationKind};
use sqlx::Row;
use tracing::instrument;

use crate::database::Database;
use crate::error::{Result, StoreError};

#[derive(Clone)]
pub struct IntegrationRepository {
    db: Database,
}

impl IntegrationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, tenant_id: i64, integration_id: i64) -> Result<Integration> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, kind, active, base_search, encrypted_credentials
            FROM integrations
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(integration_id)
        .bind(tenant_id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or(StoreError::IntegrationNotFound(integration_id))?;

        let kind_str: String = row.get("kind");
        let kind = kind_str
            .parse::<IntegrationKind>()
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;

        Ok(Integration {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            kind,
            active: row.get("active"),
            base_search: row.get("base_search"),
            encrypted_credentials: row.get("encrypted_credentials"),
        })
    }
}
