//! Vectorize Worker (spec §4.6): re-embeds an entity's text when its
//! fingerprint has changed, never blocking job completion on a persistent
//! embedding-provider failure (failures here only affect vector freshness,
//! not pipeline progress).

use std::sync::Arc;

use async_trait::async_trait;
use ingestflow_core::messages::VectorizeMessage;
use ingestflow_core::vector::{fingerprint, VectorRecord};
use ingestflow_progress::Broker;
use ingestflow_queue::ClaimedMessage;
use ingestflow_scheduler::Scheduler;
use ingestflow_storage::{EntityRepository, VectorStore};
use tracing::{instrument, warn};

use crate::embedding::EmbeddingProvider;
use crate::pool::{Disposition, MessageHandler};
use crate::run_finalize::finalize_run;

pub struct VectorizeWorker {
    entities: EntityRepository,
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    scheduler: Scheduler,
    broker: Broker,
}

impl VectorizeWorker {
    pub fn new(
        entities: EntityRepository,
        vectors: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        scheduler: Scheduler,
        broker: Broker,
    ) -> Self {
        Self { entities, vectors, embeddings, scheduler, broker }
    }

    /// Closes this message's unit in the run's in-flight batch counter (a
    /// vectorize message never fans out further); finalizes the run if this
    /// was the last one open (spec §4.3 step 5).
    async fn close_batch(&self, vectorize: &VectorizeMessage) {
        if self.scheduler.run_tracker().close_and_open(vectorize.job_id, 0) {
            finalize_run(&self.scheduler, &self.broker, vectorize.job_id, vectorize.tenant_id, &vectorize.job_name)
                .await;
        }
    }

    #[instrument(skip(self, message), fields(entity_kind = %message.entity_kind, entity_id = %message.entity_id))]
    async fn vectorize(&self, message: &VectorizeMessage) -> Result<bool, String> {
        let current = self
            .vectors
            .current_fingerprint(message.tenant_id, message.entity_kind, &message.entity_id, self.embeddings.model())
            .await
            .map_err(|e| e.to_string())?;

        if current.as_deref() == Some(message.text_fingerprint.as_str()) {
            return Ok(false);
        }

        let Some(text) = self
            .entities
            .get_text(message.tenant_id, message.entity_kind, &message.entity_id)
            .await
            .map_err(|e| e.to_string())?
        else {
            // Entity was deleted/superseded between load and vectorize; not
            // an error, just nothing left to embed.
            return Ok(false);
        };

        let actual_fingerprint = fingerprint(&text);
        if current.as_deref() == Some(actual_fingerprint.as_str()) {
            return Ok(false);
        }

        let embedding = self.embeddings.embed(&text).await.map_err(|e| e.bounded_message())?;

        self.vectors
            .upsert(VectorRecord {
                tenant_id: message.tenant_id,
                entity_kind: message.entity_kind,
                entity_id: message.entity_id.clone(),
                embedding_model: self.embeddings.model().to_string(),
                dimension: self.embeddings.dimension(),
                vector: embedding,
                text_fingerprint: actual_fingerprint,
            })
            .await
            .map_err(|e| e.to_string())?;

        Ok(true)
    }
}

#[async_trait]
impl MessageHandler for VectorizeWorker {
    async fn handle(&self, message: ClaimedMessage) -> Disposition {
        let vectorize: VectorizeMessage = match serde_json::from_value(message.payload) {
            Ok(m) => m,
            Err(e) => return Disposition::DeadLetter(format!("malformed vectorize message: {e}")),
        };

        match self.vectorize(&vectorize).await {
            Ok(_) => {
                self.close_batch(&vectorize).await;
                Disposition::Ack
            }
            Err(reason) if message.attempt >= 5 => {
                warn!(entity_id = %vectorize.entity_id, reason, "embedding retries exhausted, skipping entity");
                self.close_batch(&vectorize).await;
                Disposition::DeadLetter(reason)
            }
            Err(reason) => Disposition::Retry(reason),
        }
    }
}
