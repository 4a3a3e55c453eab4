//! Document store adapters
//!
//! `DocStoreClient` is a thin HTTP facade over the document store: the
//! authoritative collection behind `RecordStore` (read-only here) and the
//! derived collection behind `DerivedStore`. No transactions, no batching
//! beyond what the store natively offers.

use async_trait::async_trait;
use relay_core::prelude::*;
use relay_core::StoreConfig;
use reqwest::{Client, StatusCode};
use tracing::trace;

/// HTTP document store client
pub struct DocStoreClient {
    client: Client,
    config: StoreConfig,
}

impl DocStoreClient {
    /// Create a new store client
    pub fn new(config: StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RelayError::store_with_source("Failed to create client", e))?;

        Ok(Self { client, config })
    }

    fn doc_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/v1/collections/{}/docs/{}",
            self.config.base_url.trim_end_matches('/'),
            collection,
            id
        )
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.auth_token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Ping the store
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/v1/health", self.config.base_url.trim_end_matches('/'));
        let resp = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| RelayError::store_with_source("Ping failed", e))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(RelayError::store(format!("Ping returned {}", resp.status())))
        }
    }
}

#[async_trait]
impl RecordStore for DocStoreClient {
    async fn get(&self, id: &str) -> Result<Record> {
        let collection = &self.config.source_collection;
        let url = self.doc_url(collection, id);

        let resp = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| RelayError::store_with_source("Get request failed", e))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Err(RelayError::not_found(collection.clone(), id)),
            status if status.is_success() => {
                let record = resp
                    .json::<Record>()
                    .await
                    .map_err(|e| RelayError::store_with_source("Failed to parse record", e))?;
                trace!(id, collection = %collection, "Fetched record");
                Ok(record)
            }
            status => Err(RelayError::store(format!("Get returned {}", status))),
        }
    }
}

#[async_trait]
impl DerivedStore for DocStoreClient {
    async fn set(&self, id: &str, record: &DerivedRecord) -> Result<()> {
        let collection = &self.config.derived_collection;
        let url = self.doc_url(collection, id);

        let resp = self
            .with_auth(self.client.put(&url))
            .json(record)
            .send()
            .await
            .map_err(|e| RelayError::store_with_source("Set request failed", e))?;

        if resp.status().is_success() {
            trace!(id, collection = %collection, "Set derived record");
            Ok(())
        } else {
            Err(RelayError::store(format!("Set returned {}", resp.status())))
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let collection = &self.config.derived_collection;
        let url = self.doc_url(collection, id);

        let resp = self
            .with_auth(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| RelayError::store_with_source("Delete request failed", e))?;

        // Deleting an absent document is a no-op, same as the store itself
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            trace!(id, collection = %collection, "Deleted derived record");
            Ok(())
        } else {
            Err(RelayError::store(format!(
                "Delete returned {}",
                resp.status()
            )))
        }
    }
}

// ============================================================================
// Memory Store (for testing)
// ============================================================================

/// In-memory store double implementing both adapters, with per-id failure
/// injection for fallback-path tests.
pub struct MemoryStore {
    records: tokio::sync::RwLock<std::collections::HashMap<String, Record>>,
    derived: tokio::sync::RwLock<std::collections::HashMap<String, DerivedRecord>>,
    failing_deletes: tokio::sync::RwLock<std::collections::HashSet<String>>,
    failing_sets: tokio::sync::RwLock<std::collections::HashSet<String>>,
    fail_batch_delete: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: tokio::sync::RwLock::new(std::collections::HashMap::new()),
            derived: tokio::sync::RwLock::new(std::collections::HashMap::new()),
            failing_deletes: tokio::sync::RwLock::new(std::collections::HashSet::new()),
            failing_sets: tokio::sync::RwLock::new(std::collections::HashSet::new()),
            fail_batch_delete: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Seed an authoritative record
    pub async fn insert_record(&self, record: Record) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    /// Remove an authoritative record (simulates a vanished dependency)
    pub async fn remove_record(&self, id: &str) {
        self.records.write().await.remove(id);
    }

    /// Fetch a derived record, if present
    pub async fn derived_record(&self, id: &str) -> Option<DerivedRecord> {
        self.derived.read().await.get(id).cloned()
    }

    /// Number of derived records
    pub async fn derived_len(&self) -> usize {
        self.derived.read().await.len()
    }

    /// Make `delete(id)` fail for this id
    pub async fn fail_delete_of(&self, id: &str) {
        self.failing_deletes.write().await.insert(id.to_string());
    }

    /// Make `set(id, _)` fail for this id
    pub async fn fail_set_of(&self, id: &str) {
        self.failing_sets.write().await.insert(id.to_string());
    }

    /// Make the batch delete path fail outright
    pub fn fail_batch_delete(&self, fail: bool) {
        self.fail_batch_delete
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Record> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::not_found("products", id))
    }
}

#[async_trait]
impl DerivedStore for MemoryStore {
    async fn set(&self, id: &str, record: &DerivedRecord) -> Result<()> {
        if self.failing_sets.read().await.contains(id) {
            return Err(RelayError::store(format!("set failed for {}", id)));
        }
        self.derived
            .write()
            .await
            .insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if self.failing_deletes.read().await.contains(id) {
            return Err(RelayError::store(format!("delete failed for {}", id)));
        }
        self.derived.write().await.remove(id);
        Ok(())
    }

    async fn delete_batch(&self, ids: &[String]) -> Result<()> {
        if self.fail_batch_delete.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RelayError::store("batch delete failed"));
        }
        for id in ids {
            self.delete(id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.insert_record(Record::new("p1", "Title")).await;

        let record = RecordStore::get(&store, "p1").await.unwrap();
        assert_eq!(record.title, "Title");

        let derived = DerivedRecord::from_record(&record);
        store.set("p1", &derived).await.unwrap();
        assert_eq!(store.derived_record("p1").await, Some(derived));

        store.delete("p1").await.unwrap();
        assert!(store.derived_record("p1").await.is_none());

        assert!(RecordStore::get(&store, "missing")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_default_batch_delete_fails_fast() {
        let store = MemoryStore::new();
        let a = DerivedRecord::from_record(&Record::new("a", "A"));
        store.set("a", &a).await.unwrap();
        store.set("b", &a).await.unwrap();
        store.fail_delete_of("a").await;

        let ids = vec!["a".to_string(), "b".to_string()];
        assert!(store.delete_batch(&ids).await.is_err());
        // Fail-fast: "b" was never reached
        assert!(store.derived_record("b").await.is_some());
    }
}
