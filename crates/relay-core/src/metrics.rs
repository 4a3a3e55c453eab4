//! Metrics for the doc-sync relay
//!
//! Provides Prometheus-compatible metrics via the `metrics` facade.

use metrics::{counter, histogram};
use std::time::Duration;

/// Metric names as constants for consistency
pub mod names {
    // Publisher metrics
    pub const PUBLISHER_WORK_PUBLISHED: &str = "relay_publisher_work_published_total";
    pub const PUBLISHER_TRIGGERS_PUBLISHED: &str = "relay_publisher_triggers_published_total";
    pub const PUBLISHER_PUBLISH_FAILURES: &str = "relay_publisher_publish_failures_total";
    pub const PUBLISHER_PUBLISH_LATENCY: &str = "relay_publisher_publish_latency_seconds";

    // Drainer metrics
    pub const DRAIN_MESSAGES_PULLED: &str = "relay_drain_messages_pulled_total";
    pub const DRAIN_UPSERTS: &str = "relay_drain_upserts_total";
    pub const DRAIN_DELETES: &str = "relay_drain_deletes_total";
    pub const DRAIN_POISON: &str = "relay_drain_poison_total";
    pub const DRAIN_SKIPPED: &str = "relay_drain_skipped_total";
    pub const DRAIN_ACKED: &str = "relay_drain_acked_total";
    pub const DRAIN_DURATION: &str = "relay_drain_duration_seconds";
}

/// Labels for metrics
pub mod labels {
    pub const COMPONENT: &str = "component";
    pub const KIND: &str = "kind";
    pub const TOPIC: &str = "topic";
    pub const REASON: &str = "reason";
}

/// Fan-out publisher metrics
#[derive(Clone)]
pub struct PublisherMetrics {
    component: String,
}

impl PublisherMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record a successful work publish
    pub fn record_work_published(&self, kind: &str) {
        counter!(
            names::PUBLISHER_WORK_PUBLISHED,
            labels::COMPONENT => self.component.clone(),
            labels::KIND => kind.to_string(),
        )
        .increment(1);
    }

    /// Record a successful trigger publish
    pub fn record_trigger_published(&self) {
        counter!(
            names::PUBLISHER_TRIGGERS_PUBLISHED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record a failed publish on either topic
    pub fn record_publish_failure(&self, topic: &str) {
        counter!(
            names::PUBLISHER_PUBLISH_FAILURES,
            labels::COMPONENT => self.component.clone(),
            labels::TOPIC => topic.to_string(),
        )
        .increment(1);
    }

    /// Record publish latency
    pub fn record_publish_latency(&self, duration: Duration) {
        histogram!(
            names::PUBLISHER_PUBLISH_LATENCY,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
    }
}

/// Drain loop metrics
#[derive(Clone)]
pub struct DrainMetrics {
    component: String,
}

impl DrainMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record pulled messages
    pub fn record_pulled(&self, count: u64) {
        counter!(
            names::DRAIN_MESSAGES_PULLED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(count);
    }

    /// Record applied upserts
    pub fn record_upserts(&self, count: u64) {
        counter!(
            names::DRAIN_UPSERTS,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(count);
    }

    /// Record applied deletes
    pub fn record_deletes(&self, count: u64) {
        counter!(
            names::DRAIN_DELETES,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(count);
    }

    /// Record a poison message (undecodable, acked immediately)
    pub fn record_poison(&self) {
        counter!(
            names::DRAIN_POISON,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record a skipped item with a reason
    pub fn record_skipped(&self, reason: &str) {
        counter!(
            names::DRAIN_SKIPPED,
            labels::COMPONENT => self.component.clone(),
            labels::REASON => reason.to_string(),
        )
        .increment(1);
    }

    /// Record acknowledged ack ids
    pub fn record_acked(&self, count: u64) {
        counter!(
            names::DRAIN_ACKED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(count);
    }

    /// Record invocation wall time
    pub fn record_drain_duration(&self, duration: Duration) {
        histogram!(
            names::DRAIN_DURATION,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
    }
}
