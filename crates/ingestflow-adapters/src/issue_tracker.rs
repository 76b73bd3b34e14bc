//! Issue-tracker adapter (spec §4.2 variant 1): a filter expression executed
//! against a server-side cursor; one page yields up to `PAGE_SIZE` work
//! items with embedded changelogs, comments, and worklog references.

use std::time::Duration;

use async_trait::async_trait;
use ingestflow_core::checkpoint::IssueTrackerCheckpoint;
use ingestflow_core::error::{ClassifiedError, ErrorClass};
use serde_json::{json, Value};

use crate::adapter::{AdapterSession, IntegrationAdapter, PageOutcome};
use crate::http_client::AdapterHttpClient;

const PAGE_SIZE: u32 = 100;

pub struct IssueTrackerAdapter {
    fetch_timeout: Duration,
}

impl IssueTrackerAdapter {
    pub fn new(fetch_timeout: Duration) -> Self {
        Self { fetch_timeout }
    }
}

#[async_trait]
impl IntegrationAdapter for IssueTrackerAdapter {
    fn batch_kind(&self) -> &'static str {
        "issue_tracker_page"
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

        Ok(Box::new(IssueTrackerSession {
            client: AdapterHttpClient::new(base_url, token, self.fetch_timeout),
        }))
    }
}

struct IssueTrackerSession {
    client: AdapterHttpClient,
}

#[async_trait]
impl AdapterSession for IssueTrackerSession {
    async fn plan(&self, base_search: &str, checkpoint: Value) -> Result<Value, ClassifiedError> {
        let checkpoint: IssueTrackerCheckpoint = serde_json::from_value(checkpoint).unwrap_or_default();
        Ok(json!({
            "base_search": base_search,
            "cursor": checkpoint.last_cursor,
            "current_page_node": checkpoint.current_page_node,
        }))
    }

    async fn fetch_page(&self, cursor: Value) -> Result<PageOutcome, ClassifiedError> {
        let base_search = cursor
            .get("base_search")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let page_cursor = cursor.get("cursor").and_then(Value::as_str).map(str::to_string);

        let mut query = vec![("search", base_search), ("page_size", PAGE_SIZE.to_string())];
        if let Some(c) = &page_cursor {
            query.push(("cursor", c.clone()));
        }

        let body = self.client.get_json("/issues/search", &query).await?;

        let next_cursor = body.get("next_cursor").and_then(Value::as_str).map(str::to_string);
        let page_node = body.get("page_node").and_then(Value::as_str).map(str::to_string);
        let total = body.get("total").and_then(Value::as_i64);
        let processed = body.get("processed").and_then(Value::as_i64).unwrap_or(0);

        let progress_hint = total
            .filter(|t| *t > 0)
            .map(|t| ((processed.min(t) * 100) / t) as u8);

        let next_checkpoint = next_cursor.clone().map(|cursor| {
            json!(IssueTrackerCheckpoint {
                last_cursor: Some(cursor),
                current_page_node: page_node,
            })
        });

        Ok(PageOutcome {
            payload: body,
            next_cursor: next_checkpoint,
            progress_hint,
        })
    }
}
