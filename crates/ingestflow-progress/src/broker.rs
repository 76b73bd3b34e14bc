//! In-process progress broker (spec §4.7): keyed by `(tenant_id, job_name)`,
//! best-effort, no persistence — "late subscribers do not receive
//! historical events" rules out a durable store here. Grounded in
//! `control-plane::api::events::stream_sse`'s SSE shape, adapted from its
//! database-polling loop to a `tokio::sync::broadcast` fan-out per key
//! since there is no events table to poll against.

use std::sync::Arc;

use dashmap::DashMap;
use ingestflow_core::events::PipelineEvent;
use tokio::sync::broadcast;

/// Per-channel buffer: a slow subscriber that falls behind by more than
/// this many events is lagged (and, per the Gateway's heartbeat-miss rule,
/// eventually disconnected) rather than back-pressuring publishers.
const CHANNEL_CAPACITY: usize = 256;

type ChannelKey = (i64, String);

#[derive(Clone, Default)]
pub struct Broker {
    channels: Arc<DashMap<ChannelKey, broadcast::Sender<PipelineEvent>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish best-effort: if nobody is subscribed, the event is dropped
    /// (spec §4.7 "Delivery semantics: best-effort, no persistence").
    pub fn publish(&self, tenant_id: i64, event: PipelineEvent) {
        let key = (tenant_id, event.job_name().to_string());
        if let Some(sender) = self.channels.get(&key) {
            let _ = sender.send(event);
        }
    }

    /// Subscribe to `(tenant_id, job_name)`. Creates the channel lazily and
    /// leaves it registered after the last subscriber drops so a
    /// fast-reconnecting subscriber doesn't lose in-flight publishes to a
    /// channel recreation race.
    pub fn subscribe(&self, tenant_id: i64, job_name: &str) -> broadcast::Receiver<PipelineEvent> {
        let key = (tenant_id, job_name.to_string());
        self.channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestflow_core::job::JobStatus;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let broker = Broker::new();
        let mut rx = broker.subscribe(1, "issue-tracker-sync");

        broker.publish(1, PipelineEvent::status("issue-tracker-sync", JobStatus::Running, None));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_name(), "issue-tracker-sync");
    }

    #[tokio::test]
    async fn events_for_other_tenants_are_not_delivered() {
        let broker = Broker::new();
        let mut rx = broker.subscribe(1, "issue-tracker-sync");

        broker.publish(2, PipelineEvent::status("issue-tracker-sync", JobStatus::Running, None));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_dropped_silently() {
        let broker = Broker::new();
        broker.publish(1, PipelineEvent::status("no-subscribers", JobStatus::Running, None));
    }
}
