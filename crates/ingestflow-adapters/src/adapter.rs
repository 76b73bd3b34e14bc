//! `IntegrationAdapter` contract (spec §4.2), grounded in
//! `durable::activity::definition::Activity` (a typed async trait over an
//! opaque input/output) and `everruns-worker::providers` (a per-kind
//! implementation registry rather than dynamic dispatch by string).

use async_trait::async_trait;
use ingestflow_core::error::ClassifiedError;
use serde_json::Value;

/// One page of raw data plus the cursor to resume after it.
/// `next_cursor = None` means the plan is exhausted (spec §4.2 "done").
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub payload: Value,
    pub next_cursor: Option<Value>,
    /// 0-100 when the adapter can estimate total pages, else `None`
    /// (spec §4.3 "Progress reporting").
    pub progress_hint: Option<u8>,
}

#[async_trait]
pub trait AdapterSession: Send + Sync {
    /// `Plan(baseSearch, checkpoint) -> ExecutionPlan`: returns the cursor to
    /// start (or resume) fetching pages from.
    async fn plan(&self, base_search: &str, checkpoint: Value) -> Result<Value, ClassifiedError>;

    /// `FetchPage(session, cursor) -> (pageData, nextCursor | done, progressHint)`.
    async fn fetch_page(&self, cursor: Value) -> Result<PageOutcome, ClassifiedError>;
}

#[async_trait]
pub trait IntegrationAdapter: Send + Sync {
    /// Identifier attached to raw payloads so the Transform Worker selects
    /// the right normalizer (spec §4.2 `BatchKind()`).
    fn batch_kind(&self) -> &'static str;

    /// `Connect(credentials) -> session`.
    async fn connect(&self, credentials: Value) -> Result<Box<dyn AdapterSession>, ClassifiedError>;
}
