//! `WorkerPool` disposition handling, grounded in
//! `durable::worker::pool::WorkerPool`'s own test suite: a scripted handler
//! plus an in-memory `QueueBus` double, synchronized on a finalize channel
//! rather than a sleep so the assertions are not timing-dependent.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use ingestflow_core::messages::Queue;
use ingestflow_queue::{ClaimedMessage, NackOutcome, QueueBus, RetryPolicy, Result as QueueResult};
use ingestflow_workers::{Disposition, MessageHandler, PoolConfig, WorkerPool};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

#[derive(Debug, PartialEq)]
enum Finalized {
    Ack(Uuid),
    Nack { id: Uuid, max_attempts: u32 },
}

struct ScriptedBus {
    pending: Mutex<VecDeque<ClaimedMessage>>,
    finalized: mpsc::UnboundedSender<Finalized>,
}

#[async_trait]
impl QueueBus for ScriptedBus {
    async fn publish(&self, _queue: Queue, _tenant_id: i64, _payload: Value) -> QueueResult<Uuid> {
        Ok(Uuid::now_v7())
    }

    async fn claim(&self, _queue: Queue, _worker_id: &str, max: usize) -> QueueResult<Vec<ClaimedMessage>> {
        let mut pending = self.pending.lock();
        let n = max.min(pending.len());
        Ok(pending.drain(..n).collect())
    }

    async fn ack(&self, message_id: Uuid) -> QueueResult<()> {
        let _ = self.finalized.send(Finalized::Ack(message_id));
        Ok(())
    }

    async fn nack(&self, message_id: Uuid, _error: &str, policy: &RetryPolicy) -> QueueResult<NackOutcome> {
        let _ = self.finalized.send(Finalized::Nack { id: message_id, max_attempts: policy.max_attempts });
        if policy.max_attempts == 0 {
            Ok(NackOutcome::DeadLettered)
        } else {
            Ok(NackOutcome::WillRetry { next_attempt: 1 })
        }
    }

    async fn dead_letter_depth(&self, _queue: Queue) -> QueueResult<i64> {
        Ok(0)
    }
}

struct FixedDispositionHandler(Disposition);

#[async_trait]
impl MessageHandler for FixedDispositionHandler {
    async fn handle(&self, _message: ClaimedMessage) -> Disposition {
        match &self.0 {
            Disposition::Ack => Disposition::Ack,
            Disposition::Retry(r) => Disposition::Retry(r.clone()),
            Disposition::DeadLetter(r) => Disposition::DeadLetter(r.clone()),
        }
    }
}

fn claimed_message(id: Uuid) -> ClaimedMessage {
    ClaimedMessage { id, tenant_id: 1, queue: Queue::Extract, payload: serde_json::json!({}), attempt: 1 }
}

/// Runs the pool with one preloaded message, waits for the handler's
/// finalize call, then shuts the pool down.
async fn run_one_message(handler: Arc<dyn MessageHandler>) -> Finalized {
    let message_id = Uuid::now_v7();
    let (finalized_tx, mut finalized_rx) = mpsc::unbounded_channel();
    let bus: Arc<dyn QueueBus> = Arc::new(ScriptedBus {
        pending: Mutex::new(VecDeque::from([claimed_message(message_id)])),
        finalized: finalized_tx,
    });
    let pool = WorkerPool::new(
        bus,
        Queue::Extract,
        handler,
        PoolConfig::new("test-worker").with_max_concurrency(1).with_batch_size(1),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_handle = tokio::spawn(async move { pool.run(shutdown_rx).await });

    let finalized = finalized_rx.recv().await.expect("handler finalized the message");
    let _ = shutdown_tx.send(true);
    run_handle.await.unwrap();
    finalized
}

#[tokio::test]
async fn ack_disposition_acks_the_message() {
    let handler = Arc::new(FixedDispositionHandler(Disposition::Ack));
    let finalized = run_one_message(handler).await;
    assert!(matches!(finalized, Finalized::Ack(_)));
}

#[tokio::test]
async fn retry_disposition_nacks_with_the_pools_retry_policy() {
    let handler = Arc::new(FixedDispositionHandler(Disposition::Retry("transient failure".to_string())));
    let finalized = run_one_message(handler).await;
    match finalized {
        Finalized::Nack { max_attempts, .. } => assert_eq!(max_attempts, RetryPolicy::exponential().max_attempts),
        other => panic!("expected Nack, got {other:?}"),
    }
}

#[tokio::test]
async fn dead_letter_disposition_nacks_with_zero_max_attempts() {
    let handler = Arc::new(FixedDispositionHandler(Disposition::DeadLetter("malformed".to_string())));
    let finalized = run_one_message(handler).await;
    match finalized {
        Finalized::Nack { max_attempts, .. } => assert_eq!(max_attempts, 0, "spec §7 Protocol class: dead-letter bypasses retry entirely"),
        other => panic!("expected Nack, got {other:?}"),
    }
}
