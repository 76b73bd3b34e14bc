//! Source-control adapter (spec §4.2 variant 2): enumerates repositories
//! matching a filter, then walks each repo's pull requests, commits,
//! reviews, comments, and threads in turn before moving to the next repo.
//!
//! The composite `SourceControlCheckpoint` (spec §9 Open Question,
//! resolved in DESIGN.md) carries the repo queue plus one cursor per
//! sub-stream for whichever repo is in progress. A cursor of `None` means
//! "not started"; `DONE_MARKER` means "exhausted for this repo" so the
//! session can tell the two apart and advance to the next sub-stream.

use std::time::Duration;

use async_trait::async_trait;
use ingestflow_core::checkpoint::SourceControlCheckpoint;
use ingestflow_core::error::{ClassifiedError, ErrorClass};
use serde_json::{json, Value};

use crate::adapter::{AdapterSession, IntegrationAdapter, PageOutcome};
use crate::http_client::AdapterHttpClient;

const PAGE_SIZE: u32 = 100;
const DONE_MARKER: &str = "\0done";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubStream {
    PullRequests,
    Commits,
    Reviews,
    Comments,
    Threads,
}

impl SubStream {
    const ORDER: [SubStream; 5] = [
        SubStream::PullRequests,
        SubStream::Commits,
        SubStream::Reviews,
        SubStream::Comments,
        SubStream::Threads,
    ];

    fn path(self) -> &'static str {
        match self {
            SubStream::PullRequests => "pulls",
            SubStream::Commits => "commits",
            SubStream::Reviews => "reviews",
            SubStream::Comments => "comments",
            SubStream::Threads => "threads",
        }
    }

    fn cursor<'a>(self, cp: &'a SourceControlCheckpoint) -> &'a Option<String> {
        match self {
            SubStream::PullRequests => &cp.pr_cursor,
            SubStream::Commits => &cp.commit_cursor,
            SubStream::Reviews => &cp.review_cursor,
            SubStream::Comments => &cp.comment_cursor,
            SubStream::Threads => &cp.thread_cursor,
        }
    }

    fn set_cursor(self, cp: &mut SourceControlCheckpoint, value: Option<String>) {
        match self {
            SubStream::PullRequests => cp.pr_cursor = value,
            SubStream::Commits => cp.commit_cursor = value,
            SubStream::Reviews => cp.review_cursor = value,
            SubStream::Comments => cp.comment_cursor = value,
            SubStream::Threads => cp.thread_cursor = value,
        }
    }

    fn is_done(self, cp: &SourceControlCheckpoint) -> bool {
        matches!(self.cursor(cp), Some(m) if m == DONE_MARKER)
    }

    /// First sub-stream that hasn't finished for the current repo, or
    /// `None` if every sub-stream is exhausted.
    fn next_pending(cp: &SourceControlCheckpoint) -> Option<SubStream> {
        Self::ORDER.into_iter().find(|s| !s.is_done(cp))
    }
}

pub struct SourceControlAdapter {
    fetch_timeout: Duration,
}

impl SourceControlAdapter {
    pub fn new(fetch_timeout: Duration) -> Self {
        Self { fetch_timeout }
    }
}

#[async_trait]
impl IntegrationAdapter for SourceControlAdapter {
    fn batch_kind(&self) -> &'static str {
        "source_control_page"
    }

    async fn connect(&self, credentials: Value) -> Result<Box<dyn AdapterSession>, ClassifiedError> {
        let base_url = credentials
            .get("base_url")
            .and_then(Value::as_str)
            .ok_or_else(|| ClassifiedError::new(ErrorClass::Protocol, "missing base_url in credentials"))?
            .to_string();
        let token = credentials
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| ClassifiedError::new(ErrorClass::Protocol, "missing token in credentials"))?
            .to_string();

        Ok(Box::new(SourceControlSession {
            client: AdapterHttpClient::new(base_url, token, self.fetch_timeout),
        }))
    }
}

struct SourceControlSession {
    client: AdapterHttpClient,
}

#[async_trait]
impl AdapterSession for SourceControlSession {
    async fn plan(&self, base_search: &str, checkpoint: Value) -> Result<Value, ClassifiedError> {
        let mut checkpoint: SourceControlCheckpoint = serde_json::from_value(checkpoint).unwrap_or_default();

        if checkpoint.repo_queue.is_empty() && checkpoint.current_repo.is_none() {
            let body = self
                .client
                .get_json("/repos", &[("filter", base_search.to_string())])
                .await?;
            let repos = body
                .get("repos")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            checkpoint.repo_queue = repos;
        }

        Ok(serde_json::to_value(checkpoint).unwrap())
    }

    async fn fetch_page(&self, cursor: Value) -> Result<PageOutcome, ClassifiedError> {
        let mut checkpoint: SourceControlCheckpoint = serde_json::from_value(cursor)
            .map_err(|e| ClassifiedError::new(ErrorClass::Protocol, e.to_string()))?;

        if checkpoint.current_repo.is_none() {
            match checkpoint.repo_queue.first().cloned() {
                Some(repo) => {
                    checkpoint.repo_queue.remove(0);
                    checkpoint.current_repo = Some(repo);
                    checkpoint.pr_cursor = None;
                    checkpoint.commit_cursor = None;
                    checkpoint.review_cursor = None;
                    checkpoint.comment_cursor = None;
                    checkpoint.thread_cursor = None;
                }
                None => {
                    return Ok(PageOutcome {
                        payload: json!({ "items": [] }),
                        next_cursor: None,
                        progress_hint: Some(100),
                    });
                }
            }
        }

        let repo = checkpoint.current_repo.clone().unwrap();
        let stream = SubStream::next_pending(&checkpoint).expect("current repo set implies a pending sub-stream");

        let mut query = vec![("page_size", PAGE_SIZE.to_string())];
        let started = stream.cursor(&checkpoint).clone();
        if let Some(c) = &started {
            query.push(("cursor", c.clone()));
        }

        let path = format!("/repos/{}/{}", repo, stream.path());
        let mut body = self.client.get_json(&path, &query).await?;
        let page_next = body.get("next_cursor").and_then(Value::as_str).map(str::to_string);

        // Tag the page with the sub-stream and repo it came from: the
        // `source_control_page` batch kind alone doesn't tell Transform
        // which of the five endpoints produced this payload.
        if let Some(obj) = body.as_object_mut() {
            obj.insert("resource_kind".to_string(), json!(stream.path()));
            obj.insert("repository".to_string(), json!(repo));
        }

        match page_next {
            Some(next) => stream.set_cursor(&mut checkpoint, Some(next)),
            None => stream.set_cursor(&mut checkpoint, Some(DONE_MARKER.to_string())),
        }

        if SubStream::next_pending(&checkpoint).is_none() {
            checkpoint.current_repo = None;
        }

        let remaining_repos = checkpoint.repo_queue.len() + usize::from(checkpoint.current_repo.is_some());
        let progress_hint = if remaining_repos == 0 { Some(100) } else { None };

        Ok(PageOutcome {
            payload: body,
            next_cursor: Some(serde_json::to_value(checkpoint).unwrap()),
            progress_hint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_stream_order_advances_through_all_five() {
        let mut cp = SourceControlCheckpoint {
            current_repo: Some("org/repo".into()),
            ..Default::default()
        };
        for stream in SubStream::ORDER {
            assert_eq!(SubStream::next_pending(&cp), Some(stream));
            stream.set_cursor(&mut cp, Some(DONE_MARKER.to_string()));
        }
        assert_eq!(SubStream::next_pending(&cp), None);
    }
}
