//! # Relay Drainer
//!
//! Stage two of the doc-sync relay: a triggered, invocation-scoped drain
//! loop. Each invocation pulls a bounded batch of work messages, resolves
//! upserts against the authoritative store, applies them to the derived
//! store, deletes removed records (with a per-id fallback when the batch
//! path fails), and acknowledges everything it touched.
//!
//! Terminal-state invariant: every message a drain attempt visits ends
//! acknowledged - poison payloads, vanished records, and failed deletes
//! included. The message path is one-shot; retrying an unresolvable item
//! would only produce a redelivery storm.

pub mod consumer;
pub mod store;

pub use consumer::*;
pub use store::*;

use relay_core::prelude::*;
use relay_core::{DrainConfig, DrainMetrics};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Per-item terminal disposition, aggregated into the [`DrainReport`].
///
/// The skip/continue policy is data, not control flow: every pulled
/// message lands in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Resolved, transformed, and written to the derived store
    Upserted,
    /// Removed from the derived store
    Deleted,
    /// Payload never parsed; acked immediately, never retried
    Poison,
    /// Record vanished before resolution; acked, accepted data loss
    MissingRecord,
    /// Derived write failed; acked, remaining writes unaffected
    UpsertFailed,
    /// Derived delete failed in both the batch path and the fallback
    DeleteFailed,
}

/// Outcome for one pulled message
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub record_id: String,
    pub disposition: Disposition,
}

/// Report for one drain invocation
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Messages returned by the pull
    pub pulled: usize,
    /// Upserts written to the derived store
    pub upserts: usize,
    /// Deletes applied to the derived store
    pub deletes: usize,
    /// Ack ids acknowledged
    pub acked: usize,
    /// Per-item outcomes
    pub outcomes: Vec<ItemOutcome>,
    /// Wall time for the invocation
    pub elapsed: Duration,
}

impl DrainReport {
    /// Fold a follow-up cycle's report into this one
    fn absorb(&mut self, other: DrainReport) {
        self.pulled += other.pulled;
        self.upserts += other.upserts;
        self.deletes += other.deletes;
        self.acked += other.acked;
        self.outcomes.extend(other.outcomes);
        self.elapsed += other.elapsed;
    }

    fn note(&mut self, record_id: impl Into<String>, disposition: Disposition) {
        match disposition {
            Disposition::Upserted => self.upserts += 1,
            Disposition::Deleted => self.deletes += 1,
            _ => {}
        }
        self.outcomes.push(ItemOutcome {
            record_id: record_id.into(),
            disposition,
        });
    }

    /// Count of outcomes with the given disposition
    pub fn count(&self, disposition: Disposition) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.disposition == disposition)
            .count()
    }

    /// Whether the invocation had nothing to do
    pub fn is_empty(&self) -> bool {
        self.pulled == 0
    }
}

impl std::fmt::Display for DrainReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pulled={} upserts={} deletes={} acked={} elapsed={:.3}s",
            self.pulled,
            self.upserts,
            self.deletes,
            self.acked,
            self.elapsed.as_secs_f64()
        )
    }
}

/// The drain loop over injected bus and store clients.
pub struct Drainer<Q, R, D>
where
    Q: WorkSource,
    R: RecordStore,
    D: DerivedStore,
{
    source: Q,
    records: R,
    derived: D,
    metrics: DrainMetrics,
}

impl<Q, R, D> Drainer<Q, R, D>
where
    Q: WorkSource,
    R: RecordStore,
    D: DerivedStore,
{
    /// Create a new drainer
    pub fn new(source: Q, records: R, derived: D) -> Self {
        Self {
            source,
            records,
            derived,
            metrics: DrainMetrics::new("drainer"),
        }
    }

    /// Run one bounded pull-process-acknowledge cycle.
    ///
    /// Always completes with a report; partial internal failures are
    /// logged and recorded per item, never propagated, so the hosting
    /// platform never sees an invocation failure to retry.
    pub async fn drain(&self, max_messages: usize) -> DrainReport {
        let start = Instant::now();
        let mut report = DrainReport::default();

        // 1. Pull
        let deliveries = match self.source.pull(max_messages).await {
            Ok(deliveries) => deliveries,
            Err(e) if e.is_timeout() => {
                info!(
                    elapsed_s = start.elapsed().as_secs_f64(),
                    "No messages available"
                );
                report.elapsed = start.elapsed();
                return report;
            }
            Err(e) => {
                error!(error = %e, "Error pulling messages from subscription");
                report.elapsed = start.elapsed();
                return report;
            }
        };

        if deliveries.is_empty() {
            info!("No messages available");
            report.elapsed = start.elapsed();
            return report;
        }

        info!(
            pulled = deliveries.len(),
            max = max_messages,
            "Pulled messages from work subscription"
        );
        report.pulled = deliveries.len();
        self.metrics.record_pulled(deliveries.len() as u64);

        // 2. Classify & parse
        let mut upserts: Vec<(WorkMessage, String)> = Vec::new();
        let mut deletes: Vec<(WorkMessage, String)> = Vec::new();
        let mut poison_acks: Vec<String> = Vec::new();

        for delivery in deliveries {
            match WorkMessage::from_bytes(&delivery.payload) {
                Ok(message) => {
                    if message.event_type.is_upsert() {
                        upserts.push((message, delivery.ack_id));
                    } else {
                        deletes.push((message, delivery.ack_id));
                    }
                }
                Err(e) => {
                    // Poison: it can never parse, so it must never be retried
                    error!(error = %e, ack_id = %delivery.ack_id, "Undecodable work message, acking");
                    self.metrics.record_poison();
                    report.note("unknown", Disposition::Poison);
                    poison_acks.push(delivery.ack_id);
                }
            }
        }

        if !poison_acks.is_empty() {
            self.acknowledge(&poison_acks, &mut report).await;
        }

        // 3–5. Resolve, transform, apply, and ack the upsert bucket
        if !upserts.is_empty() {
            self.apply_upserts(&upserts, &mut report).await;
            let ack_ids: Vec<String> = upserts.iter().map(|(_, ack)| ack.clone()).collect();
            self.acknowledge(&ack_ids, &mut report).await;
        }

        // 6–7. Apply and ack the delete bucket
        if !deletes.is_empty() {
            self.apply_deletes(&deletes, &mut report).await;
            let ack_ids: Vec<String> = deletes.iter().map(|(_, ack)| ack.clone()).collect();
            self.acknowledge(&ack_ids, &mut report).await;
        }

        // 8. Report
        report.elapsed = start.elapsed();
        self.metrics.record_upserts(report.upserts as u64);
        self.metrics.record_deletes(report.deletes as u64);
        self.metrics.record_drain_duration(report.elapsed);
        info!(%report, "Drain cycle complete");
        report
    }

    /// Resolve each upsert against the record store, transform, and write.
    ///
    /// A vanished record is skipped (its message is still acked by the
    /// caller: retrying cannot bring the record back). A failed write is
    /// isolated per item so the remaining writes still land.
    async fn apply_upserts(&self, upserts: &[(WorkMessage, String)], report: &mut DrainReport) {
        let mut resolved: Vec<Record> = Vec::with_capacity(upserts.len());

        for (message, _) in upserts {
            match self.records.get(&message.product_id).await {
                Ok(record) => resolved.push(record),
                Err(e) => {
                    error!(
                        record_id = %message.product_id,
                        error = %e,
                        "Error getting record from store, skipping"
                    );
                    self.metrics.record_skipped("missing_record");
                    report.note(&message.product_id, Disposition::MissingRecord);
                }
            }
        }

        let mut applied = 0usize;
        for record in &resolved {
            let derived = DerivedRecord::from_record(record);
            match self.derived.set(&record.id, &derived).await {
                Ok(()) => {
                    applied += 1;
                    report.note(&record.id, Disposition::Upserted);
                }
                Err(e) => {
                    error!(record_id = %record.id, error = %e, "Error writing derived record");
                    self.metrics.record_skipped("write_failed");
                    report.note(&record.id, Disposition::UpsertFailed);
                }
            }
        }

        if applied > 0 {
            info!(applied, "Upserted records into derived collection");
        }
    }

    /// Delete the batch of ids; on batch failure, fall back to per-id
    /// deletes, continuing past individual failures so one bad id cannot
    /// block the rest.
    async fn apply_deletes(&self, deletes: &[(WorkMessage, String)], report: &mut DrainReport) {
        let ids: Vec<String> = deletes
            .iter()
            .map(|(message, _)| message.product_id.clone())
            .collect();

        match self.derived.delete_batch(&ids).await {
            Ok(()) => {
                for id in &ids {
                    report.note(id, Disposition::Deleted);
                }
                info!(count = ids.len(), "Deleted records from derived collection");
            }
            Err(e) => {
                error!(error = %e, ?ids, "Batch delete failed, trying one by one");
                for id in &ids {
                    match self.derived.delete(id).await {
                        Ok(()) => {
                            info!(record_id = %id, "Deleted record in one-by-one fallback");
                            report.note(id, Disposition::Deleted);
                        }
                        Err(e) => {
                            error!(
                                record_id = %id,
                                error = %e,
                                "Error deleting record in one-by-one fallback"
                            );
                            self.metrics.record_skipped("delete_failed");
                            report.note(id, Disposition::DeleteFailed);
                        }
                    }
                }
            }
        }
    }

    /// Ack a batch of ids; ack failure is logged, never raised - the ack
    /// deadline plus idempotent apply cover the redelivery.
    async fn acknowledge(&self, ack_ids: &[String], report: &mut DrainReport) {
        match self.source.acknowledge(ack_ids).await {
            Ok(()) => {
                report.acked += ack_ids.len();
                self.metrics.record_acked(ack_ids.len() as u64);
            }
            Err(e) => {
                warn!(error = %e, count = ack_ids.len(), "Failed to acknowledge messages");
            }
        }
    }

    /// Run drain cycles until the backlog is exhausted.
    ///
    /// A cycle that fills its pull budget means more work may be pending,
    /// so draining repeats until a cycle pulls fewer than `max_messages`.
    /// Work published under triggers that were already consumed is still
    /// cleared this way, keeping staleness bounded by trigger latency plus
    /// one batch.
    pub async fn drain_backlog(&self, max_messages: usize) -> DrainReport {
        let mut total = DrainReport::default();
        loop {
            let report = self.drain(max_messages).await;
            let full = max_messages > 0 && report.pulled == max_messages;
            total.absorb(report);
            if !full {
                return total;
            }
        }
    }

    /// Access the work source
    pub fn source(&self) -> &Q {
        &self.source
    }
}

/// Run drain cycles on trigger receipt until shutdown.
///
/// All trigger messages fetched within one wait window are acknowledged
/// up front, then the backlog is drained to exhaustion. Collapsing N
/// triggers into one backlog drain is safe because `drain_backlog` keeps
/// cycling while pulls come back full, so no work message published under
/// a consumed trigger is left stranded. An idle trigger wait just loops.
pub async fn run_triggered<T, Q, R, D>(
    triggers: &T,
    drainer: &Drainer<Q, R, D>,
    config: &DrainConfig,
) -> Result<()>
where
    T: WorkSource,
    Q: WorkSource,
    R: RecordStore,
    D: DerivedStore,
{
    info!("Waiting for trigger messages");

    loop {
        tokio::select! {
            pulled = triggers.pull(config.trigger_batch) => {
                match pulled {
                    Ok(deliveries) => {
                        let ack_ids: Vec<String> =
                            deliveries.iter().map(|d| d.ack_id.clone()).collect();
                        if let Err(e) = triggers.acknowledge(&ack_ids).await {
                            warn!(error = %e, "Failed to ack trigger messages");
                        }
                        info!(triggers = deliveries.len(), "Trigger received, draining");
                        drainer.drain_backlog(config.max_messages).await;
                    }
                    Err(e) if e.is_timeout() => continue,
                    Err(e) => {
                        error!(error = %e, "Error pulling trigger messages");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::event::ChangeKind;

    fn drainer_over(
        source: MockSource,
        store: std::sync::Arc<MemoryStore>,
    ) -> Drainer<MockSource, std::sync::Arc<MemoryStore>, std::sync::Arc<MemoryStore>> {
        Drainer::new(source, store.clone(), store)
    }

    #[tokio::test]
    async fn test_empty_pull_is_a_noop() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let drainer = drainer_over(MockSource::new(), store);

        let report = drainer.drain(40).await;
        assert!(report.is_empty());
        assert_eq!(report.acked, 0);
    }

    #[tokio::test]
    async fn test_pull_failure_returns_zero_processed() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let source = MockSource::new();
        source.fail_pull(true);
        let drainer = drainer_over(source, store);

        let report = drainer.drain(40).await;
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_create_flows_into_derived_store() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.insert_record(Record::new("1", "Dummy Title")).await;

        let source = MockSource::new();
        source
            .push_work(&WorkMessage::new("1", ChangeKind::Create), "ack-1")
            .await;

        let drainer = drainer_over(source, store.clone());
        let report = drainer.drain(40).await;

        assert_eq!(report.upserts, 1);
        assert_eq!(report.acked, 1);
        let derived = store.derived_record("1").await.unwrap();
        assert_eq!(derived.title, "Dummy Title");
        assert_eq!(drainer.source().acked().await, vec!["ack-1"]);
    }

    #[tokio::test]
    async fn test_delete_removes_derived_record() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.insert_record(Record::new("1", "Dummy Title")).await;

        let source = MockSource::new();
        source
            .push_work(&WorkMessage::new("1", ChangeKind::Create), "ack-1")
            .await;
        let drainer = drainer_over(source, store.clone());
        drainer.drain(40).await;
        assert!(store.derived_record("1").await.is_some());

        drainer.source().push_work(&WorkMessage::new("1", ChangeKind::Delete), "ack-2").await;
        let report = drainer.drain(40).await;

        assert_eq!(report.deletes, 1);
        assert!(store.derived_record("1").await.is_none());
        assert_eq!(drainer.source().acked().await, vec!["ack-1", "ack-2"]);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.insert_record(Record::new("1", "Dummy Title")).await;

        let source = MockSource::new();
        let message = WorkMessage::new("1", ChangeKind::Update);
        source.push_work(&message, "ack-1").await;
        let drainer = drainer_over(source, store.clone());
        drainer.drain(40).await;
        let first = store.derived_record("1").await.unwrap();

        // Simulated redelivery after a lapsed ack deadline
        drainer.source().push_work(&message, "ack-1b").await;
        let report = drainer.drain(40).await;

        assert_eq!(report.upserts, 1);
        assert_eq!(store.derived_record("1").await.unwrap(), first);
        assert_eq!(store.derived_len().await, 1);
    }

    #[tokio::test]
    async fn test_poison_message_acked_immediately() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let source = MockSource::new();
        source
            .push(Delivery::new(&b"not json"[..], "ack-poison"))
            .await;

        let drainer = drainer_over(source, store.clone());
        let report = drainer.drain(40).await;

        assert_eq!(report.count(Disposition::Poison), 1);
        assert_eq!(report.acked, 1);
        assert_eq!(drainer.source().acked().await, vec!["ack-poison"]);
        assert_eq!(store.derived_len().await, 0);
    }

    #[tokio::test]
    async fn test_missing_record_skipped_but_acked() {
        let store = std::sync::Arc::new(MemoryStore::new());
        // "ghost" is deleted upstream between the update and this drain
        store.insert_record(Record::new("ghost", "Ghost")).await;
        let source = MockSource::new();
        source
            .push_work(&WorkMessage::new("ghost", ChangeKind::Update), "ack-ghost")
            .await;
        store.remove_record("ghost").await;

        let drainer = drainer_over(source, store.clone());
        let report = drainer.drain(40).await;

        assert_eq!(report.upserts, 0);
        assert_eq!(report.count(Disposition::MissingRecord), 1);
        assert_eq!(report.acked, 1);
        assert_eq!(drainer.source().acked().await, vec!["ack-ghost"]);
    }

    #[tokio::test]
    async fn test_upsert_write_failure_is_isolated() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.insert_record(Record::new("a", "A")).await;
        store.insert_record(Record::new("b", "B")).await;
        store.insert_record(Record::new("c", "C")).await;
        store.fail_set_of("b").await;

        let source = MockSource::new();
        for id in ["a", "b", "c"] {
            source
                .push_work(&WorkMessage::new(id, ChangeKind::Create), &format!("ack-{}", id))
                .await;
        }

        let drainer = drainer_over(source, store.clone());
        let report = drainer.drain(40).await;

        assert_eq!(report.upserts, 2);
        assert_eq!(report.count(Disposition::UpsertFailed), 1);
        assert!(store.derived_record("a").await.is_some());
        assert!(store.derived_record("b").await.is_none());
        assert!(store.derived_record("c").await.is_some());
        // All three acked regardless
        assert_eq!(report.acked, 3);
    }

    #[tokio::test]
    async fn test_bulk_delete_fallback_continues_past_failures() {
        let store = std::sync::Arc::new(MemoryStore::new());
        for id in ["a", "b", "c"] {
            let record = Record::new(id, id.to_uppercase());
            store
                .set(id, &DerivedRecord::from_record(&record))
                .await
                .unwrap();
        }
        store.fail_batch_delete(true);
        store.fail_delete_of("b").await;

        let source = MockSource::new();
        for id in ["a", "b", "c"] {
            source
                .push_work(&WorkMessage::new(id, ChangeKind::Delete), &format!("ack-{}", id))
                .await;
        }

        let drainer = drainer_over(source, store.clone());
        let report = drainer.drain(40).await;

        // A and C deleted via the fallback, B failed, all three acked
        assert!(store.derived_record("a").await.is_none());
        assert!(store.derived_record("b").await.is_some());
        assert!(store.derived_record("c").await.is_none());
        assert_eq!(report.deletes, 2);
        assert_eq!(report.count(Disposition::DeleteFailed), 1);
        assert_eq!(report.acked, 3);
        assert_eq!(
            drainer.source().acked().await,
            vec!["ack-a", "ack-b", "ack-c"]
        );
    }

    #[tokio::test]
    async fn test_mixed_batch_buckets_and_counts() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.insert_record(Record::new("u1", "U1")).await;
        let gone = Record::new("d1", "D1");
        store
            .set("d1", &DerivedRecord::from_record(&gone))
            .await
            .unwrap();

        let source = MockSource::new();
        source
            .push_work(&WorkMessage::new("u1", ChangeKind::Create), "ack-u1")
            .await;
        source
            .push_work(&WorkMessage::new("d1", ChangeKind::Delete), "ack-d1")
            .await;
        source.push(Delivery::new(&b"{"[..], "ack-bad")).await;

        let drainer = drainer_over(source, store.clone());
        let report = drainer.drain(40).await;

        assert_eq!(report.pulled, 3);
        assert_eq!(report.upserts, 1);
        assert_eq!(report.deletes, 1);
        assert_eq!(report.count(Disposition::Poison), 1);
        assert_eq!(report.acked, 3);
        assert!(store.derived_record("u1").await.is_some());
        assert!(store.derived_record("d1").await.is_none());
    }

    #[tokio::test]
    async fn test_backlog_beyond_one_batch_fully_drained() {
        // 45 pending work messages against a pull budget of 40; a collapsed
        // trigger batch still has to clear all of them in one backlog drain.
        let store = std::sync::Arc::new(MemoryStore::new());
        let source = MockSource::new();
        for i in 0..45 {
            let id = format!("p{}", i);
            store.insert_record(Record::new(&id, format!("Title {}", i))).await;
            source
                .push_work(&WorkMessage::new(&id, ChangeKind::Create), &format!("ack-{}", i))
                .await;
        }

        let drainer = drainer_over(source, store.clone());
        let report = drainer.drain_backlog(40).await;

        assert_eq!(report.pulled, 45);
        assert_eq!(report.upserts, 45);
        assert_eq!(report.acked, 45);
        assert_eq!(store.derived_len().await, 45);
        assert_eq!(drainer.source().acked().await.len(), 45);
    }

    #[tokio::test]
    async fn test_backlog_drain_stops_on_exact_batch_boundary() {
        // Exactly one full batch: the follow-up cycle sees the idle
        // timeout and the loop terminates with nothing double-applied.
        let store = std::sync::Arc::new(MemoryStore::new());
        let source = MockSource::new();
        for i in 0..40 {
            let id = format!("p{}", i);
            store.insert_record(Record::new(&id, "T")).await;
            source
                .push_work(&WorkMessage::new(&id, ChangeKind::Create), &format!("ack-{}", i))
                .await;
        }

        let drainer = drainer_over(source, store.clone());
        let report = drainer.drain_backlog(40).await;

        assert_eq!(report.pulled, 40);
        assert_eq!(report.upserts, 40);
        assert_eq!(store.derived_len().await, 40);
    }

    #[tokio::test]
    async fn test_same_id_create_then_delete_in_one_batch() {
        // Per-record delivery order holds within a batch: the later
        // message's effect wins, so a create followed by a delete of the
        // same id leaves the derived store without the record.
        let store = std::sync::Arc::new(MemoryStore::new());
        store.insert_record(Record::new("1", "Dummy Title")).await;

        let source = MockSource::new();
        source
            .push_work(&WorkMessage::new("1", ChangeKind::Create), "ack-1")
            .await;
        source
            .push_work(&WorkMessage::new("1", ChangeKind::Delete), "ack-2")
            .await;

        let drainer = drainer_over(source, store.clone());
        let report = drainer.drain(40).await;

        assert_eq!(report.upserts, 1);
        assert_eq!(report.deletes, 1);
        assert_eq!(report.acked, 2);
        assert!(store.derived_record("1").await.is_none());
    }

    #[tokio::test]
    async fn test_same_id_rapid_updates_apply_latest_state() {
        // Two rapid updates to one id in a single pulled batch: both
        // resolve against the authoritative store, so the surviving
        // derived record reflects the newest state.
        let store = std::sync::Arc::new(MemoryStore::new());
        store.insert_record(Record::new("1", "Second Title")).await;

        let source = MockSource::new();
        let message = WorkMessage::new("1", ChangeKind::Update);
        source.push_work(&message, "ack-1").await;
        source.push_work(&message, "ack-2").await;

        let drainer = drainer_over(source, store.clone());
        let report = drainer.drain(40).await;

        assert_eq!(report.upserts, 2);
        assert_eq!(report.acked, 2);
        assert_eq!(store.derived_len().await, 1);
        assert_eq!(
            store.derived_record("1").await.map(|d| d.title),
            Some("Second Title".to_string())
        );
    }

    #[tokio::test]
    async fn test_report_display_summarizes_counts() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.insert_record(Record::new("1", "T")).await;
        let source = MockSource::new();
        source
            .push_work(&WorkMessage::new("1", ChangeKind::Create), "ack-1")
            .await;

        let drainer = drainer_over(source, store);
        let report = drainer.drain(40).await;
        let summary = report.to_string();
        assert!(summary.contains("pulled=1"));
        assert!(summary.contains("upserts=1"));
    }
}
