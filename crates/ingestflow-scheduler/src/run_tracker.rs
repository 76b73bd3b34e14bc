//! Per-run in-flight batch counter (spec §4.3 step 5 "`ReportRunFinished`
//! only after Transform/Load/Vectorize acknowledge closure of all in-flight
//! batches for the run, tracked via an in-run counter"; spec §2 "Completion
//! of the last message for a batch sequence closes the job run").
//!
//! Extract opens one unit per staged page; Transform/Load/Vectorize each
//! close the unit for the message they just finished handling, opening as
//! many new units as messages they fanned out to in the same step. The run
//! is complete once the count drains to zero *and* extraction itself has
//! stopped producing new pages — shaped like `CancellationRegistry`'s
//! `DashMap<i64, _>` registry, keyed the same way.

use std::sync::Arc;

use dashmap::DashMap;

#[derive(Default, Clone, Copy)]
struct RunState {
    open_batches: i64,
    extraction_done: bool,
}

#[derive(Clone, Default)]
pub struct RunTracker {
    runs: Arc<DashMap<i64, RunState>>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets tracking for a freshly-fired run.
    pub fn begin_run(&self, job_id: i64) {
        self.runs.insert(job_id, RunState::default());
    }

    /// Registers `n` new in-flight batches (Extract staging a page, Load
    /// fanning out to `n` vectorize messages, ...).
    pub fn open_batches(&self, job_id: i64, n: i64) {
        if n == 0 {
            return;
        }
        self.runs.entry(job_id).or_default().open_batches += n;
    }

    /// A stage finished handling one message, fanning out to `opened` new
    /// downstream messages in the same step (net delta `opened - 1`).
    /// Returns `true` if the run is now complete.
    pub fn close_and_open(&self, job_id: i64, opened: i64) -> bool {
        let mut state = self.runs.entry(job_id).or_default();
        state.open_batches += opened - 1;
        state.open_batches <= 0 && state.extraction_done
    }

    /// Extraction has stopped producing new pages. Returns `true` if the
    /// run is already complete (e.g. every batch it opened already closed
    /// before the extraction loop itself returned).
    pub fn mark_extraction_done(&self, job_id: i64) -> bool {
        let mut state = self.runs.entry(job_id).or_default();
        state.extraction_done = true;
        state.open_batches <= 0
    }

    /// Drops tracking state for a run once it's finalized (or abandoned),
    /// so the map doesn't accumulate an entry per historical run.
    pub fn forget(&self, job_id: i64) {
        self.runs.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_only_after_extraction_done_and_batches_drained() {
        let tracker = RunTracker::new();
        tracker.begin_run(1);
        tracker.open_batches(1, 1);

        assert!(!tracker.close_and_open(1, 0), "batch closed but extraction still running");
        assert!(tracker.mark_extraction_done(1), "last batch already closed, extraction now done too");
    }

    #[test]
    fn extraction_finishing_first_waits_for_the_last_batch_to_close() {
        let tracker = RunTracker::new();
        tracker.begin_run(1);
        tracker.open_batches(1, 1);

        assert!(!tracker.mark_extraction_done(1), "one batch still open");
        assert!(tracker.close_and_open(1, 0), "extraction already done, this was the last batch");
    }

    #[test]
    fn fan_out_keeps_the_run_open_until_every_descendant_closes() {
        let tracker = RunTracker::new();
        tracker.begin_run(1);
        tracker.open_batches(1, 1);
        tracker.mark_extraction_done(1);

        // Transform closes its unit but fans out to one Load message.
        assert!(!tracker.close_and_open(1, 1));
        // Load closes its unit, fanning out to two Vectorize messages.
        assert!(!tracker.close_and_open(1, 2));
        // Two vectorize messages close independently; only the last drains it.
        assert!(!tracker.close_and_open(1, 0));
        assert!(tracker.close_and_open(1, 0));
    }
}
