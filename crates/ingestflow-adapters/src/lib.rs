pub mod adapter;
pub mod http_client;
pub mod issue_tracker;
pub mod source_control;

pub use adapter::{AdapterSession, IntegrationAdapter, PageOutcome};
pub use http_client::AdapterHttpClient;
pub use issue_tracker::IssueTrackerAdapter;
pub use source_control::SourceControlAdapter;
