//! Tenant: the isolation boundary (spec §3). Every other entity, queue
//! message, cache key, and subscription channel carries a `tenant_id` and
//! must never cross it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    /// Asset/storage folder for tenant-scoped blobs (logos, exports, etc.).
    /// Opaque to the pipeline core; passed through untouched.
    pub asset_folder: String,
}

/// Marker trait for any type that carries a tenant scope. Used by repository
/// and broker code to assert at compile time that cross-tenant leakage isn't
/// possible by construction (every query/publish/subscribe call takes a
/// `TenantScoped` value and reads `tenant_id()` from it).
pub trait TenantScoped {
    fn tenant_id(&self) -> i64;
}

impl TenantScoped for Tenant {
    fn tenant_id(&self) -> i64 {
        self.id
    }
}

/// Newtype wrapper making `Uuid` fields self-documenting at call sites where
/// a bare `Uuid` could otherwise be confused with a batch id or job id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
