//! Durable message bus: a single `queue_messages` table partitioned by the
//! `queue` column, claimed with `FOR UPDATE SKIP LOCKED` so concurrent
//! worker pools never double-process a message. Grounded in
//! `durable::persistence::postgres::PostgresStore::{claim_task, fail_task}`.

use async_trait::async_trait;
use chrono::Utc;
use ingestflow_core::messages::Queue;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub id: Uuid,
    pub tenant_id: i64,
    pub queue: Queue,
    pub payload: serde_json::Value,
    pub attempt: u32,
}

#[derive(Debug)]
pub enum NackOutcome {
    WillRetry { next_attempt: u32 },
    DeadLettered,
}

#[async_trait]
pub trait QueueBus: Send + Sync {
    async fn publish(&self, queue: Queue, tenant_id: i64, payload: serde_json::Value) -> Result<Uuid>;

    /// Claim up to `max_messages` from `queue`, per spec §5 "Backpressure":
    /// callers bound this to their configured prefetch window.
    async fn claim(&self, queue: Queue, worker_id: &str, max_messages: usize) -> Result<Vec<ClaimedMessage>>;

    async fn ack(&self, message_id: Uuid) -> Result<()>;

    async fn nack(&self, message_id: Uuid, error_message: &str, policy: &RetryPolicy) -> Result<NackOutcome>;

    /// Count of dead-lettered messages per queue, for operator visibility.
    async fn dead_letter_depth(&self, queue: Queue) -> Result<i64>;
}

#[derive(Clone)]
pub struct PostgresQueueBus {
    pool: PgPool,
}

impl PostgresQueueBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueBus for PostgresQueueBus {
    #[instrument(skip(self, payload))]
    async fn publish(&self, queue: Queue, tenant_id: i64, payload: serde_json::Value) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO queue_messages (
                id, tenant_id, queue, payload, status, attempt, max_attempts, visible_at, created_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(queue.as_str())
        .bind(&payload)
        .bind(RetryPolicy::exponential().max_attempts as i32)
        .execute(&self.pool)
        .await?;

        debug!(%id, queue = queue.as_str(), "published message");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn claim(&self, queue: Queue, worker_id: &str, max_messages: usize) -> Result<Vec<ClaimedMessage>> {
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM queue_messages
                WHERE queue = $1
                  AND status = 'pending'
                  AND visible_at <= NOW()
                ORDER BY visible_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_messages m
            SET status = 'claimed',
                claimed_by = $3,
                claimed_at = NOW(),
                heartbeat_at = NOW(),
                attempt = attempt + 1
            FROM claimable c
            WHERE m.id = c.id
            RETURNING m.id, m.tenant_id, m.payload, m.attempt
            "#,
        )
        .bind(queue.as_str())
        .bind(max_messages as i64)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ClaimedMessage {
                id: row.get("id"),
                tenant_id: row.get("tenant_id"),
                queue,
                payload: row.get("payload"),
                attempt: row.get::<i32, _>("attempt") as u32,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn ack(&self, message_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM queue_messages WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, policy))]
    async fn nack(&self, message_id: Uuid, error_message: &str, policy: &RetryPolicy) -> Result<NackOutcome> {
        let row = sqlx::query("SELECT attempt, max_attempts FROM queue_messages WHERE id = $1 FOR UPDATE")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(QueueError::MessageNotFound(message_id))?;

        let attempt: i32 = row.get("attempt");
        let attempt = attempt as u32;

        if policy.has_attempts_remaining(attempt) {
            let delay = policy.delay_for_attempt(attempt + 1);
            let visible_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

            sqlx::query(
                r#"
                UPDATE queue_messages
                SET status = 'pending',
                    claimed_by = NULL,
                    claimed_at = NULL,
                    heartbeat_at = NULL,
                    last_error = $2,
                    visible_at = $3
                WHERE id = $1
                "#,
            )
            .bind(message_id)
            .bind(error_message)
            .bind(visible_at)
            .execute(&self.pool)
            .await?;

            Ok(NackOutcome::WillRetry {
                next_attempt: attempt + 1,
            })
        } else {
            sqlx::query(
                r#"
                UPDATE queue_messages
                SET status = 'dead_letter', last_error = $2
                WHERE id = $1
                "#,
            )
            .bind(message_id)
            .bind(error_message)
            .execute(&self.pool)
            .await?;

            Ok(NackOutcome::DeadLettered)
        }
    }

    #[instrument(skip(self))]
    async fn dead_letter_depth(&self, queue: Queue) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM queue_messages WHERE queue = $1 AND status = 'dead_letter'")
            .bind(queue.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}
