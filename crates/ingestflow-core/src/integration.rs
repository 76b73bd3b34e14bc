//! Integration: `(tenant_id, kind, active, base_search, encrypted_credentials, id)`
//! (spec §3). `kind` selects the adapter; `base_search` is opaque to the
//! core and interpreted only by that adapter.

use serde::{Deserialize, Serialize};

/// Integration kind. A tagged variant, not a dynamic string registry
/// (spec §9 "Dynamic class-based integration registry becomes a tagged
/// variant `IntegrationKind`"). Adding a kind means adding a variant plus an
/// adapter registration, never a runtime string lookup into unknown code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrationKind {
    IssueTracker,
    SourceControl,
}

impl IntegrationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntegrationKind::IssueTracker => "issue-tracker",
            IntegrationKind::SourceControl => "source-control",
        }
    }
}

impl std::fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IntegrationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue-tracker" => Ok(IntegrationKind::IssueTracker),
            "source-control" => Ok(IntegrationKind::SourceControl),
            other => Err(format!("unknown integration kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: i64,
    pub tenant_id: i64,
    pub kind: IntegrationKind,
    pub active: bool,
    /// Opaque filter string the adapter interprets (e.g. JQL, repo filter).
    pub base_search: String,
    /// Envelope-encrypted credential payload; never decrypted or logged
    /// outside of `CredentialsStore::get`.
    pub encrypted_credentials: serde_json::Value,
}

impl crate::tenant::TenantScoped for Integration {
    fn tenant_id(&self) -> i64 {
        self.tenant_id
    }
}
