//! RawBatch: an append-only staged page of source data, the handoff unit
//! between Extract and Transform (spec §3, §8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tenant::{BatchId, TenantScoped};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBatch {
    pub tenant_id: i64,
    pub integration_id: i64,
    pub batch_id: BatchId,
    /// Adapter-reported kind, selects the Transform Worker's normalizer.
    pub kind: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub consumed_by_transform_at: Option<DateTime<Utc>>,
}

impl TenantScoped for RawBatch {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}
