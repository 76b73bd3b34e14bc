//! Queue message contracts (spec §6 "Queue bus"). Field names and types are
//! contractual — adapters, workers, and tests all share these shapes so a
//! missing `tenant_id` is a compile error, not a runtime protocol error.

use serde::{Deserialize, Serialize};

use crate::entities::EntityDrafts;
use crate::tenant::{BatchId, TenantScoped};
use crate::vector::EntityKind;

/// The four logical queues the bus routes by (spec §2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    Extract,
    Transform,
    Load,
    Vectorize,
}

impl Queue {
    pub fn as_str(self) -> &'static str {
        match self {
            Queue::Extract => "extract",
            Queue::Transform => "transform",
            Queue::Load => "load",
            Queue::Vectorize => "vectorize",
        }
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `extract: {tenant_id, job_id, job_name, integration_id, checkpoint}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractMessage {
    pub tenant_id: i64,
    pub job_id: i64,
    pub job_name: String,
    pub integration_id: i64,
    pub checkpoint: serde_json::Value,
}

/// `transform: {tenant_id, job_id, job_name, batch_id, kind}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformMessage {
    pub tenant_id: i64,
    pub job_id: i64,
    pub job_name: String,
    pub batch_id: BatchId,
    pub kind: String,
}

/// `load: {tenant_id, job_id, job_name, batch_id, entities}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadMessage {
    pub tenant_id: i64,
    pub job_id: i64,
    pub job_name: String,
    pub batch_id: BatchId,
    pub entities: EntityDrafts,
}

/// `vectorize: {tenant_id, job_id, job_name, entity_kind, entity_id, text_fingerprint}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizeMessage {
    pub tenant_id: i64,
    pub job_id: i64,
    pub job_name: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub text_fingerprint: String,
}

impl TenantScoped for ExtractMessage {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}
impl TenantScoped for TransformMessage {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}
impl TenantScoped for LoadMessage {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}
impl TenantScoped for VectorizeMessage {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}

/// Routing key the bus uses to keep per-batch ordering across stages
/// (spec §5: "the queue bus routes by a key derived from
/// `(tenant_id, batch_id)` so no downstream reordering across stages
/// affects a single batch").
pub fn routing_key(tenant_id: i64, batch_id: BatchId) -> String {
    format!("{tenant_id}:{batch_id}")
}
