//! Fan-out publisher
//!
//! Classifies a change event and republishes it as (a) an ordered work
//! message keyed by record id and (b) a content-free trigger message.
//! The two publishes are independent: a failure on one is logged and never
//! blocks the other, so a transient trigger failure cannot keep a work item
//! out of the durable backlog.

use relay_core::prelude::*;
use relay_core::PublisherMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{error, info};

/// Fan-out publisher over an injected work sink.
pub struct FanOutPublisher<S: WorkSink> {
    sink: S,
    metrics: PublisherMetrics,
    processed: AtomicU64,
}

impl<S: WorkSink> FanOutPublisher<S> {
    /// Create a new publisher
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            metrics: PublisherMetrics::new("fan_out_publisher"),
            processed: AtomicU64::new(0),
        }
    }

    /// Classify and fan out one change event.
    ///
    /// Classification failure (neither snapshot present) propagates; it is
    /// a publish-side contract violation, not a drain-side concern. Publish
    /// failures on either topic are logged and absorbed.
    pub async fn publish(&self, event: &ChangeEvent) -> Result<ChangeKind> {
        let kind = event.kind()?;
        let message = WorkMessage::new(&event.record_id, kind);
        let start = Instant::now();

        match self.sink.publish_work(&message).await {
            Ok(message_id) => {
                self.metrics.record_work_published(kind.as_str());
                info!(
                    message_id,
                    record_id = %event.record_id,
                    kind = %kind,
                    event_id = %event.event_id,
                    "Published work message"
                );
            }
            Err(e) => {
                self.metrics.record_publish_failure("work");
                error!(
                    error = %e,
                    record_id = %event.record_id,
                    event_id = %event.event_id,
                    "Error publishing to work topic"
                );
            }
        }

        match self.sink.publish_trigger().await {
            Ok(message_id) => {
                self.metrics.record_trigger_published();
                info!(message_id, event_id = %event.event_id, "Published trigger message");
            }
            Err(e) => {
                self.metrics.record_publish_failure("trigger");
                error!(error = %e, event_id = %event.event_id, "Error publishing to trigger topic");
            }
        }

        self.metrics.record_publish_latency(start.elapsed());
        self.processed.fetch_add(1, Ordering::Relaxed);
        Ok(kind)
    }

    /// Events handled so far
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Access the underlying sink
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MockSink;
    use serde_json::json;

    #[tokio::test]
    async fn test_fanout_publishes_both_messages() {
        let publisher = FanOutPublisher::new(MockSink::new());

        let event = ChangeEvent::created("1", json!({"id": "1", "title": "Dummy Title"}));
        let kind = publisher.publish(&event).await.unwrap();

        assert_eq!(kind, ChangeKind::Create);
        let work = publisher.sink().work_messages().await;
        assert_eq!(work, vec![WorkMessage::new("1", ChangeKind::Create)]);
        assert_eq!(publisher.sink().trigger_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_event_classified_from_before_snapshot() {
        let publisher = FanOutPublisher::new(MockSink::new());

        let event = ChangeEvent::deleted("1", json!({"id": "1"}));
        let kind = publisher.publish(&event).await.unwrap();

        assert_eq!(kind, ChangeKind::Delete);
        let work = publisher.sink().work_messages().await;
        assert_eq!(work[0].event_type, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn test_work_failure_does_not_block_trigger() {
        let sink = MockSink::new();
        sink.fail_work(true);
        let publisher = FanOutPublisher::new(sink);

        let event = ChangeEvent::created("2", json!({"id": "2"}));
        let kind = publisher.publish(&event).await.unwrap();

        assert_eq!(kind, ChangeKind::Create);
        assert!(publisher.sink().work_messages().await.is_empty());
        assert_eq!(publisher.sink().trigger_count(), 1);
    }

    #[tokio::test]
    async fn test_trigger_failure_does_not_block_work() {
        let sink = MockSink::new();
        sink.fail_trigger(true);
        let publisher = FanOutPublisher::new(sink);

        let event = ChangeEvent::updated("3", json!({"v": 1}), json!({"v": 2}));
        publisher.publish(&event).await.unwrap();

        assert_eq!(publisher.sink().work_messages().await.len(), 1);
        assert_eq!(publisher.sink().trigger_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_shape_raises() {
        let publisher = FanOutPublisher::new(MockSink::new());

        let event = ChangeEvent {
            record_id: "4".to_string(),
            before: None,
            after: None,
            event_id: "evt-4".to_string(),
        };
        let err = publisher.publish(&event).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidEventShape { .. }));
        assert!(publisher.sink().work_messages().await.is_empty());
        assert_eq!(publisher.sink().trigger_count(), 0);
    }
}
