//! Bus sink strategies for the fan-out publisher
//!
//! Implements `WorkSink` for NATS JetStream. Topic provisioning is
//! idempotent get-or-create: an existing stream is success, never an error.

use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use relay_core::prelude::*;
use relay_core::RetryPolicy;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// JetStream sink configuration
#[derive(Debug, Clone)]
pub struct JetStreamSinkConfig {
    /// Bus server URL
    pub url: String,
    /// Ordered bulk-work topic
    pub work_topic: String,
    /// Unordered trigger topic
    pub trigger_topic: String,
    /// Connection name
    pub connection_name: String,
    /// Backoff policy for stream creation
    pub retry: RetryPolicy,
}

impl Default for JetStreamSinkConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            work_topic: "bulk-products".to_string(),
            trigger_topic: "trigger-products".to_string(),
            connection_name: "relay-publisher".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Stream name derived from a topic name (`bulk-products` → `BULK_PRODUCTS`)
pub fn stream_name(topic: &str) -> String {
    topic.replace('-', "_").to_uppercase()
}

/// JetStream-backed work sink.
///
/// Constructed once at process start and passed by reference into the
/// publisher; no module-level client state.
pub struct JetStreamSink {
    config: JetStreamSinkConfig,
    jetstream: Context,
}

impl JetStreamSink {
    /// Connect and provision both topics.
    pub async fn connect(config: JetStreamSinkConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to bus");

        let client = async_nats::ConnectOptions::new()
            .name(&config.connection_name)
            .connect(&config.url)
            .await
            .map_err(|e| RelayError::bus_with_source("Failed to connect", e))?;

        let js = jetstream::new(client);

        // The work topic carries one subject per record id, which is what
        // gives per-record ordering; the trigger topic is a single subject.
        ensure_stream(
            &js,
            &stream_name(&config.work_topic),
            vec![format!("{}.*", config.work_topic)],
            &config.retry,
        )
        .await?;
        ensure_stream(
            &js,
            &stream_name(&config.trigger_topic),
            vec![config.trigger_topic.clone()],
            &config.retry,
        )
        .await?;

        Ok(Self {
            config,
            jetstream: js,
        })
    }

    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<String> {
        let ack = self
            .jetstream
            .publish(subject, payload)
            .await
            .map_err(|e| RelayError::bus_with_source("Publish failed", e))?
            .await
            .map_err(|e| RelayError::bus_with_source("Publish ack failed", e))?;

        Ok(format!("{}:{}", ack.stream, ack.sequence))
    }
}

#[async_trait]
impl WorkSink for JetStreamSink {
    async fn publish_work(&self, message: &WorkMessage) -> Result<String> {
        // Subject token = ordering key; the stream preserves order per subject
        let subject = format!("{}.{}", self.config.work_topic, message.ordering_key());
        self.publish(subject, message.to_bytes()?).await
    }

    async fn publish_trigger(&self) -> Result<String> {
        self.publish(
            self.config.trigger_topic.clone(),
            TriggerMessage::new().to_bytes()?,
        )
        .await
    }
}

/// Idempotent get-or-create for a stream, with bounded exponential backoff
/// on transient creation failure.
pub async fn ensure_stream(
    js: &Context,
    name: &str,
    subjects: Vec<String>,
    retry: &RetryPolicy,
) -> Result<()> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        if js.get_stream(name).await.is_ok() {
            debug!(stream = name, "Stream exists");
            return Ok(());
        }

        let config = jetstream::stream::Config {
            name: name.to_string(),
            subjects: subjects.clone(),
            retention: jetstream::stream::RetentionPolicy::Limits,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        };

        match js.create_stream(config).await {
            Ok(_) => {
                info!(stream = name, "Created stream");
                return Ok(());
            }
            Err(e) => {
                // A concurrent creator winning the race is success
                if js.get_stream(name).await.is_ok() {
                    debug!(stream = name, "Stream created concurrently");
                    return Ok(());
                }
                if !retry.should_retry(attempt) {
                    return Err(RelayError::bus_with_source(
                        format!("Failed to create stream {}", name),
                        e,
                    ));
                }
                let delay = retry.delay(attempt);
                warn!(stream = name, error = %e, ?delay, "Stream creation failed, backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ============================================================================
// Mock Sink (for testing)
// ============================================================================

/// Mock work sink for testing
pub struct MockSink {
    work: tokio::sync::RwLock<Vec<WorkMessage>>,
    triggers: AtomicU64,
    fail_work: std::sync::atomic::AtomicBool,
    fail_trigger: std::sync::atomic::AtomicBool,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            work: tokio::sync::RwLock::new(Vec::new()),
            triggers: AtomicU64::new(0),
            fail_work: std::sync::atomic::AtomicBool::new(false),
            fail_trigger: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// All published work messages
    pub async fn work_messages(&self) -> Vec<WorkMessage> {
        self.work.read().await.clone()
    }

    /// Count of published triggers
    pub fn trigger_count(&self) -> u64 {
        self.triggers.load(Ordering::Relaxed)
    }

    /// Make work publishes fail
    pub fn fail_work(&self, fail: bool) {
        self.fail_work.store(fail, Ordering::SeqCst);
    }

    /// Make trigger publishes fail
    pub fn fail_trigger(&self, fail: bool) {
        self.fail_trigger.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkSink for MockSink {
    async fn publish_work(&self, message: &WorkMessage) -> Result<String> {
        if self.fail_work.load(Ordering::SeqCst) {
            return Err(RelayError::bus("work publish failed"));
        }
        let mut work = self.work.write().await;
        work.push(message.clone());
        Ok(format!("work:{}", work.len()))
    }

    async fn publish_trigger(&self) -> Result<String> {
        if self.fail_trigger.load(Ordering::SeqCst) {
            return Err(RelayError::bus("trigger publish failed"));
        }
        let n = self.triggers.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("trigger:{}", n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_name() {
        assert_eq!(stream_name("bulk-products"), "BULK_PRODUCTS");
        assert_eq!(stream_name("trigger-products"), "TRIGGER_PRODUCTS");
    }

    #[tokio::test]
    async fn test_mock_sink_records_publishes() {
        let sink = MockSink::new();

        let msg = WorkMessage::new("p1", ChangeKind::Create);
        sink.publish_work(&msg).await.unwrap();
        sink.publish_trigger().await.unwrap();

        assert_eq!(sink.work_messages().await, vec![msg]);
        assert_eq!(sink.trigger_count(), 1);
    }
}
