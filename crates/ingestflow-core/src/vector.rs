//! Vector record: `(tenant_id, entity_kind, entity_id, embedding_model,
//! dimension, vector, text_fingerprint)` (spec §3). Invariant: exactly one
//! current vector per `(tenant_id, entity_kind, entity_id, embedding_model)`;
//! replaced, never appended, when the source text changes.

use serde::{Deserialize, Serialize};

use crate::tenant::TenantScoped;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    WorkItem,
    PullRequest,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::WorkItem => write!(f, "work_item"),
            EntityKind::PullRequest => write!(f, "pull_request"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub tenant_id: i64,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub vector: Vec<f32>,
    /// Hash of the source text at embedding time; compared against the
    /// current source text to decide whether to skip re-embedding.
    pub text_fingerprint: String,
}

impl TenantScoped for VectorRecord {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}

/// Stable fingerprint for the embedding skip-check (spec §4.6: "compute
/// fingerprint; if unchanged since last vector, skip").
pub fn fingerprint(text: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_same_text() {
        assert_eq!(fingerprint("hello world"), fingerprint("hello world"));
    }

    #[test]
    fn fingerprint_differs_for_different_text() {
        assert_ne!(fingerprint("hello"), fingerprint("world"));
    }
}
