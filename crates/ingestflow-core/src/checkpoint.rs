//! Checkpoint semantics (spec §3 "Checkpoint semantics", §4.2 ordering).
//!
//! Checkpoints are opaque JSON owned by the adapter; the core only enforces
//! the monotonicity rule (advance only after durable staging) and exposes
//! typed helpers for the two required adapter shapes so the Extract Worker
//! doesn't have to hand-roll JSON patches per kind.

use serde::{Deserialize, Serialize};

/// Issue-tracker checkpoint: `{last_cursor, current_page_node}` (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IssueTrackerCheckpoint {
    pub last_cursor: Option<String>,
    pub current_page_node: Option<String>,
}

/// Source-control checkpoint: one composite checkpoint carrying the repo
/// queue and the in-progress repo's sub-stream cursors (spec §3, §4.2).
/// Per spec §9 Open Question, sub-streams are modeled as one composite
/// rather than five independent checkpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceControlCheckpoint {
    pub repo_queue: Vec<String>,
    pub current_repo: Option<String>,
    pub pr_cursor: Option<String>,
    pub commit_cursor: Option<String>,
    pub review_cursor: Option<String>,
    pub comment_cursor: Option<String>,
    pub thread_cursor: Option<String>,
}

/// An empty checkpoint, used by admin "reset checkpoint" mutations
/// (`checkpoint_data := {}`, spec §6) regardless of adapter kind.
pub fn empty() -> serde_json::Value {
    serde_json::json!({})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_tracker_checkpoint_round_trips() {
        let cp = IssueTrackerCheckpoint {
            last_cursor: Some("abc".into()),
            current_page_node: Some("node-5".into()),
        };
        let json = serde_json::to_value(&cp).unwrap();
        let back: IssueTrackerCheckpoint = serde_json::from_value(json).unwrap();
        assert_eq!(cp, back);
    }

    #[test]
    fn source_control_checkpoint_round_trips() {
        let cp = SourceControlCheckpoint {
            repo_queue: vec!["org/a".into(), "org/b".into()],
            current_repo: Some("org/a".into()),
            pr_cursor: Some("pr-10".into()),
            commit_cursor: None,
            review_cursor: None,
            comment_cursor: None,
            thread_cursor: None,
        };
        let json = serde_json::to_value(&cp).unwrap();
        let back: SourceControlCheckpoint = serde_json::from_value(json).unwrap();
        assert_eq!(cp, back);
    }

    #[test]
    fn empty_checkpoint_is_empty_object() {
        assert_eq!(empty(), serde_json::json!({}));
    }
}
