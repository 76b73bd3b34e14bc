//! Storage boundary error type.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job not found: {0}")]
    JobNotFound(i64),

    #[error("integration not found: {0}")]
    IntegrationNotFound(i64),

    #[error("raw batch not found: {0}")]
    RawBatchNotFound(Uuid),

    #[error("CAS conflict: job {0} is not in the expected state")]
    CasConflict(i64),

    #[error("encryption error: {0}")]
    Encryption(String),
}
