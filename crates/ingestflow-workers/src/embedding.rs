//! Embedding provider contract (spec §4.6), grounded in
//! `AdapterHttpClient`'s classified-error HTTP pattern. The pool's
//! `RetryPolicy` owns the K=5 retry budget (spec §7 *Embedding* class), so
//! this provider makes one attempt per call and leaves retry scheduling to
//! the `WorkerPool`.

use async_trait::async_trait;
use ingestflow_core::error::{ClassifiedError, ErrorClass};
use serde_json::json;
use std::time::Duration;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model(&self) -> &str;
    fn dimension(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClassifiedError>;
}

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: String, api_key: String, model: String, dimension: usize, timeout: Duration) -> Self {
        let client = reqwest::Client::builder().timeout(timeout).build().unwrap_or_default();
        Self {
            client,
            base_url,
            api_key,
            model,
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClassifiedError> {
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| ClassifiedError::new(ErrorClass::Embedding, e.to_string()))?;

        let status = response.status().as_u16();
        if status >= 300 {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifiedError::new(ErrorClass::Embedding, format!("status {status}: {body}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClassifiedError::new(ErrorClass::Embedding, e.to_string()))?;

        let vector = body
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("embedding"))
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| ClassifiedError::new(ErrorClass::Embedding, "missing embedding in response"))?
            .iter()
            .filter_map(serde_json::Value::as_f64)
            .map(|v| v as f32)
            .collect::<Vec<f32>>();

        if vector.len() != self.dimension {
            return Err(ClassifiedError::new(
                ErrorClass::Embedding,
                format!("expected dimension {}, got {}", self.dimension, vector.len()),
            ));
        }

        Ok(vector)
    }
}
