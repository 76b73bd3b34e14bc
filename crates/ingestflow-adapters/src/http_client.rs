//! Shared outbound HTTP helper: classifies remote failures per spec §7 and
//! retries *transient-remote* failures inline within the current page fetch
//! (spec §7: "retry within the current page up to M=3 times with
//! exponential backoff; on exhaustion escalate to run-failure").

use std::time::Duration;

use ingestflow_core::error::{ClassifiedError, ErrorClass};
use serde_json::Value;
use tracing::warn;

/// Within-page retry budget (spec §7 *Transient-remote*).
const MAX_INLINE_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct AdapterHttpClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl AdapterHttpClient {
    pub fn new(base_url: String, bearer_token: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            bearer_token,
        }
    }

    /// GET `path` with `query`, retrying transient failures inline. Returns
    /// the parsed JSON body or a classified, already-exhausted error.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ClassifiedError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.bearer_token)
                .query(query)
                .send()
                .await;

            let outcome = match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if status < 300 {
                        return resp
                            .json::<Value>()
                            .await
                            .map_err(|e| ClassifiedError::new(ErrorClass::Protocol, e.to_string()));
                    }
                    let body = resp.text().await.unwrap_or_default();
                    Err(ClassifiedError::from_status(status, body))
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    Err(ClassifiedError::new(ErrorClass::TransientRemote, e.to_string()))
                }
                Err(e) => Err(ClassifiedError::new(ErrorClass::PermanentRemote, e.to_string())),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.class.is_retryable_inline() && attempt < MAX_INLINE_RETRIES => {
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                    warn!(attempt, class = ?e.class, "transient adapter failure, retrying inline");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
