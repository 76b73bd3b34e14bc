//! Per-job cancellation tokens (spec §5 "Cancellation & timeouts": "the
//! cancellation flag itself is observed by the Extract Worker via a
//! cancellation token, not by polling this row"). Shared between the
//! `Scheduler`'s admin `cancel_run` mutation and the Extract Worker, which
//! checks its job's token between page fetches.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<DashMap<i64, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `job_id`, created fresh if this is a new run.
    pub fn token_for(&self, job_id: i64) -> CancellationToken {
        self.tokens.entry(job_id).or_insert_with(CancellationToken::new).clone()
    }

    pub fn cancel(&self, job_id: i64) {
        if let Some(token) = self.tokens.get(&job_id) {
            token.cancel();
        }
    }

    /// Drop the token once the run has finished, so a later run gets a
    /// fresh, uncancelled token rather than inheriting a cancelled one.
    pub fn clear(&self, job_id: i64) {
        self.tokens.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_marks_the_jobs_token_cancelled() {
        let registry = CancellationRegistry::new();
        let token = registry.token_for(7);
        assert!(!token.is_cancelled());

        registry.cancel(7);
        assert!(token.is_cancelled());
    }

    #[test]
    fn clearing_a_job_yields_a_fresh_token_next_time() {
        let registry = CancellationRegistry::new();
        registry.cancel(7);
        registry.clear(7);

        let token = registry.token_for(7);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancelling_an_unknown_job_is_a_no_op() {
        let registry = CancellationRegistry::new();
        registry.cancel(999);
    }
}
