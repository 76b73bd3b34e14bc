//! Error taxonomy for the ingestflow pipeline (spec §7).

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by domain-level operations (validation, checkpoint merge,
/// message construction). Storage/queue/adapter crates define their own
/// boundary error types and convert into `ErrorClass` for propagation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("missing tenant_id on {0}")]
    MissingTenant(&'static str),

    #[error("checkpoint serialization error: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// The error taxonomy from spec §7. Adapters classify remote failures into
/// one of these; workers and the scheduler act on the class, never on the
/// raw error, so retry/escalation policy lives in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, 5xx, connection resets, rate-limit. Retry within the
    /// current page up to M=3 times with exponential backoff.
    TransientRemote,
    /// 4xx excluding rate-limit. Fail the run, no retry within the tick.
    PermanentRemote,
    /// 401/403. Fail the run; neither job nor integration is disabled.
    AuthRemote,
    /// Malformed message, missing tenant_id. Dead-letter immediately.
    Protocol,
    /// Per-entity normalization failure. Soft-error, continue the batch.
    Parse,
    /// Missing foreign referent at load time. Defer up to 3 times, then
    /// load with a null reference and warn.
    Referential,
    /// Embedding provider failure. Retry up to K=5, then skip the entity.
    Embedding,
    /// Scheduler-detected stale RUNNING row on restart.
    Abandonment,
}

impl ErrorClass {
    /// Whether an error of this class should be retried automatically by
    /// the component that observed it (adapters for transient-remote pages,
    /// the embedding worker for embedding failures).
    pub fn is_retryable_inline(self) -> bool {
        matches!(self, ErrorClass::TransientRemote | ErrorClass::Embedding)
    }

    /// Whether this class fails the entire run (vs. a soft per-entity error).
    pub fn fails_run(self) -> bool {
        matches!(
            self,
            ErrorClass::PermanentRemote
                | ErrorClass::AuthRemote
                | ErrorClass::Protocol
                | ErrorClass::Abandonment
        )
    }
}

/// A classified remote-call outcome, used by adapters to report failures to
/// the Extract Worker without leaking transport-specific error types across
/// the crate boundary.
#[derive(Debug, Error)]
#[error("{class:?}: {message}")]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    /// Classify an HTTP status code per spec §7's remote taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let class = match status {
            401 | 403 => ErrorClass::AuthRemote,
            429 => ErrorClass::TransientRemote,
            500..=599 => ErrorClass::TransientRemote,
            400..=499 => ErrorClass::PermanentRemote,
            _ => ErrorClass::TransientRemote,
        };
        Self::new(class, message)
    }

    /// `error_message` is bounded to 2 KB and must never contain
    /// credentials (spec §7, "User-visible behavior").
    pub fn bounded_message(&self) -> String {
        const MAX_LEN: usize = 2048;
        if self.message.len() <= MAX_LEN {
            self.message.clone()
        } else {
            let mut truncated = self.message.chars().take(MAX_LEN).collect::<String>();
            truncated.push_str("...(truncated)");
            truncated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_as_transient() {
        let e = ClassifiedError::from_status(429, "too many requests");
        assert_eq!(e.class, ErrorClass::TransientRemote);
        assert!(e.class.is_retryable_inline());
    }

    #[test]
    fn classifies_unauthorized_as_auth_remote() {
        let e = ClassifiedError::from_status(401, "bad token");
        assert_eq!(e.class, ErrorClass::AuthRemote);
        assert!(e.class.fails_run());
    }

    #[test]
    fn classifies_404_as_permanent() {
        let e = ClassifiedError::from_status(404, "not found");
        assert_eq!(e.class, ErrorClass::PermanentRemote);
        assert!(!e.class.is_retryable_inline());
    }

    #[test]
    fn bounds_long_messages_to_2kb() {
        let long = "x".repeat(5000);
        let e = ClassifiedError::new(ErrorClass::PermanentRemote, long);
        assert!(e.bounded_message().len() <= 2048 + "...(truncated)".len());
    }
}
