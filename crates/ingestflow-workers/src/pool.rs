//! Generic worker pool consuming one `QueueBus` queue (spec §5 "Worker
//! pools"). Grounded in `durable::worker::pool::WorkerPool` plus
//! `durable::worker::poller::TaskPoller`'s adaptive backoff, adapted to the
//! simpler `QueueBus::claim/ack/nack` contract: there is no separate
//! `WorkflowEventStore` heartbeat/registration surface here, so the pool
//! only tracks concurrency and poll backoff, not worker identity rows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ingestflow_core::messages::Queue;
use ingestflow_queue::{ClaimedMessage, QueueBus, RetryPolicy};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, instrument, warn};

/// What a handler decided to do with a claimed message, distinct from a
/// Rust-level error so "malformed message, dead-letter immediately" (spec
/// §7 Protocol class) doesn't have to be threaded through a generic error
/// type with a retry policy override.
pub enum Disposition {
    Ack,
    /// Requeue under the pool's configured `RetryPolicy`.
    Retry(String),
    /// Bypass retries entirely (spec §7 Protocol class).
    DeadLetter(String),
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: ClaimedMessage) -> Disposition;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub worker_id: String,
    pub max_concurrency: usize,
    pub min_poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub backoff_multiplier: f64,
    pub batch_size: usize,
    pub retry_policy: RetryPolicy,
}

impl PoolConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            max_concurrency: 10,
            min_poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            batch_size: 10,
            retry_policy: RetryPolicy::exponential(),
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

pub struct WorkerPool {
    bus: Arc<dyn QueueBus>,
    queue: Queue,
    handler: Arc<dyn MessageHandler>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(bus: Arc<dyn QueueBus>, queue: Queue, handler: Arc<dyn MessageHandler>, config: PoolConfig) -> Self {
        Self { bus, queue, handler, config }
    }

    /// Run until `shutdown` fires (spec §5 "graceful shutdown"): in-flight
    /// message handlers are spawned tasks the caller does not explicitly
    /// await here, matching the teacher's "signal, then let permits drain"
    /// pattern rather than a join-all barrier.
    #[instrument(skip(self), fields(queue = %self.queue, worker_id = %self.config.worker_id))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut interval = self.config.min_poll_interval;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let available = semaphore.available_permits();
            if available == 0 {
                if wait_or_shutdown(interval, &mut shutdown).await {
                    break;
                }
                continue;
            }

            let claim_count = available.min(self.config.batch_size);
            match self.bus.claim(self.queue, &self.config.worker_id, claim_count).await {
                Ok(messages) if messages.is_empty() => {
                    interval = next_backoff(interval, &self.config);
                }
                Ok(messages) => {
                    interval = self.config.min_poll_interval;
                    debug!(count = messages.len(), "claimed messages");
                    for message in messages {
                        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                            break;
                        };
                        self.spawn_handler(message, permit);
                    }
                }
                Err(e) => {
                    error!(error = %e, "claim failed");
                    interval = next_backoff(interval, &self.config);
                }
            }

            if wait_or_shutdown(interval, &mut shutdown).await {
                break;
            }
        }
        info!("worker pool shut down");
    }

    fn spawn_handler(&self, message: ClaimedMessage, permit: tokio::sync::OwnedSemaphorePermit) {
        let bus = Arc::clone(&self.bus);
        let handler = Arc::clone(&self.handler);
        let policy = self.config.retry_policy.clone();
        let queue = self.queue;

        tokio::spawn(async move {
            let message_id = message.id;
            let attempt = message.attempt;
            let disposition = handler.handle(message).await;

            let outcome = match disposition {
                Disposition::Ack => bus.ack(message_id).await,
                Disposition::Retry(reason) => {
                    warn!(%message_id, %queue, attempt, reason, "message requeued for retry");
                    bus.nack(message_id, &reason, &policy).await.map(|_| ())
                }
                Disposition::DeadLetter(reason) => {
                    warn!(%message_id, %queue, reason, "message dead-lettered immediately");
                    let immediate = RetryPolicy { max_attempts: 0, ..policy };
                    bus.nack(message_id, &reason, &immediate).await.map(|_| ())
                }
            };

            if let Err(e) = outcome {
                error!(%message_id, error = %e, "failed to finalize message");
            }
            drop(permit);
        });
    }
}

fn next_backoff(current: Duration, config: &PoolConfig) -> Duration {
    current.mul_f64(config.backoff_multiplier).min(config.max_poll_interval)
}

async fn wait_or_shutdown(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        _ = shutdown.changed() => *shutdown.borrow(),
    }
}
