//! Strategy traits for the doc-sync relay
//!
//! Each external collaborator (message bus, authoritative store, derived
//! store) sits behind an async trait so components receive explicit client
//! objects by injection instead of reaching for hidden module-level
//! singletons, and so tests can substitute in-memory doubles.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::Result;
use crate::event::WorkMessage;
use crate::record::{DerivedRecord, Record};

/// A single pulled bus message: raw payload plus an opaque ack id.
///
/// The payload is kept undecoded so the drain loop owns the poison-message
/// policy; the ack id stays valid until the ack deadline lapses.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Bytes,
    pub ack_id: String,
}

impl Delivery {
    pub fn new(payload: impl Into<Bytes>, ack_id: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ack_id: ack_id.into(),
        }
    }
}

/// Publish side of the bus: fan-out target for classified changes.
#[async_trait]
pub trait WorkSink: Send + Sync {
    /// Publish an ordered work message keyed by its record id.
    ///
    /// Returns the bus-assigned message id.
    async fn publish_work(&self, message: &WorkMessage) -> Result<String>;

    /// Publish a content-free trigger message (no ordering key).
    async fn publish_trigger(&self) -> Result<String>;
}

/// Consume side of the bus: bounded pull with explicit acknowledgment.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Pull up to `max_messages` from the work subscription, waiting at
    /// most the source's configured bound. An elapsed wait surfaces as a
    /// `Timeout` error; callers treat it as the expected idle case.
    async fn pull(&self, max_messages: usize) -> Result<Vec<Delivery>>;

    /// Acknowledge a batch of ack ids.
    async fn acknowledge(&self, ack_ids: &[String]) -> Result<()>;
}

/// Read facade over the authoritative record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record by id; missing records surface as `NotFound`.
    async fn get(&self, id: &str) -> Result<Record>;
}

/// Write facade over the derived store.
#[async_trait]
pub trait DerivedStore: Send + Sync {
    /// Full-value set, keyed by record id. Idempotent by construction.
    async fn set(&self, id: &str, record: &DerivedRecord) -> Result<()>;

    /// Delete a single derived record.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Batch delete, fail-fast on the first error.
    ///
    /// The store offers no true bulk primitive, so the default is an
    /// iterating loop; the drain loop owns the per-id fallback when this
    /// path fails.
    async fn delete_batch(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.delete(id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for std::sync::Arc<T> {
    async fn get(&self, id: &str) -> Result<Record> {
        (**self).get(id).await
    }
}

#[async_trait]
impl<T: DerivedStore + ?Sized> DerivedStore for std::sync::Arc<T> {
    async fn set(&self, id: &str, record: &DerivedRecord) -> Result<()> {
        (**self).set(id, record).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id).await
    }

    async fn delete_batch(&self, ids: &[String]) -> Result<()> {
        (**self).delete_batch(ids).await
    }
}

/// Exponential backoff policy for topic/subscription provisioning.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(600),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let delay =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        std::cmp::min(Duration::from_millis(delay as u64), self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(2), Duration::from_secs(20));
        // Large attempts clamp at the maximum backoff
        assert_eq!(policy.delay(12), Duration::from_secs(600));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }
}
