//! Change events and wire formats
//!
//! Defines the ternary change classification and the two message payloads
//! that flow over the bus: the ordered work message and the content-free
//! trigger message.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{RelayError, Result};

/// Kind of change observed on an authoritative record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// New record created (only the after snapshot present)
    Create,
    /// Existing record updated (both snapshots present)
    Update,
    /// Record deleted (only the before snapshot present)
    Delete,
}

impl ChangeKind {
    /// Derive the change kind from snapshot presence.
    ///
    /// Truth table: (before, after) → kind
    /// - (true,  true)  → Update
    /// - (false, true)  → Create
    /// - (true,  false) → Delete
    /// - (false, false) → InvalidEventShape
    pub fn classify(before_present: bool, after_present: bool) -> Result<Self> {
        match (before_present, after_present) {
            (true, true) => Ok(Self::Update),
            (false, true) => Ok(Self::Create),
            (true, false) => Ok(Self::Delete),
            (false, false) => Err(RelayError::InvalidEventShape {
                event_id: "unknown".to_string(),
            }),
        }
    }

    /// Wire name used in the work message
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Whether the drain loop treats this as an upsert (vs a delete)
    pub fn is_upsert(&self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A document-level change notification from the authoritative store.
///
/// Transient: produced by the change event source, consumed once by the
/// classifier, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Stable record id
    pub record_id: String,

    /// Snapshot before the change (None on create)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,

    /// Snapshot after the change (None on delete)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,

    /// Source-assigned event id
    #[serde(default = "fresh_event_id")]
    pub event_id: String,
}

fn fresh_event_id() -> String {
    Uuid::now_v7().to_string()
}

impl ChangeEvent {
    /// Create event (after snapshot only)
    pub fn created(record_id: impl Into<String>, after: Value) -> Self {
        Self {
            record_id: record_id.into(),
            before: None,
            after: Some(after),
            event_id: fresh_event_id(),
        }
    }

    /// Update event (both snapshots)
    pub fn updated(record_id: impl Into<String>, before: Value, after: Value) -> Self {
        Self {
            record_id: record_id.into(),
            before: Some(before),
            after: Some(after),
            event_id: fresh_event_id(),
        }
    }

    /// Delete event (before snapshot only)
    pub fn deleted(record_id: impl Into<String>, before: Value) -> Self {
        Self {
            record_id: record_id.into(),
            before: Some(before),
            after: None,
            event_id: fresh_event_id(),
        }
    }

    /// Classify this event per the snapshot-presence truth table.
    pub fn kind(&self) -> Result<ChangeKind> {
        ChangeKind::classify(self.before.is_some(), self.after.is_some()).map_err(|_| {
            RelayError::InvalidEventShape {
                event_id: self.event_id.clone(),
            }
        })
    }

    /// Deserialize from bytes (NDJSON adapter seam)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| RelayError::serialization_with_source("Failed to decode change event", e))
    }
}

/// Work item for the drain loop, durable until acknowledged.
///
/// Published with ordering key = record id so the bus preserves per-record
/// delivery order; no ordering guarantee across distinct records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMessage {
    /// Authoritative record id
    pub product_id: String,
    /// What happened to the record
    pub event_type: ChangeKind,
}

/// On-wire wrapper for [`WorkMessage`]: `{"data": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkEnvelope {
    data: WorkMessage,
}

impl WorkMessage {
    pub fn new(product_id: impl Into<String>, event_type: ChangeKind) -> Self {
        Self {
            product_id: product_id.into(),
            event_type,
        }
    }

    /// Ordering key for the bus
    pub fn ordering_key(&self) -> &str {
        &self.product_id
    }

    /// Serialize to the wire format
    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(&WorkEnvelope { data: self.clone() })
            .map(Bytes::from)
            .map_err(|e| RelayError::serialization_with_source("Failed to encode work message", e))
    }

    /// Deserialize from the wire format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice::<WorkEnvelope>(bytes)
            .map(|e| e.data)
            .map_err(|e| RelayError::serialization_with_source("Failed to decode work message", e))
    }
}

/// Content-free wake-up signal for the drain loop.
///
/// Redundant triggers are expected and harmless: the drain loop's bounded
/// pull and empty-check make repeated triggers idempotent no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub trigger_it: bool,
}

impl TriggerMessage {
    pub fn new() -> Self {
        Self { trigger_it: true }
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| RelayError::serialization_with_source("Failed to encode trigger", e))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| RelayError::serialization_with_source("Failed to decode trigger", e))
    }
}

impl Default for TriggerMessage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_truth_table() {
        assert_eq!(
            ChangeKind::classify(true, true).unwrap(),
            ChangeKind::Update
        );
        assert_eq!(
            ChangeKind::classify(false, true).unwrap(),
            ChangeKind::Create
        );
        assert_eq!(
            ChangeKind::classify(true, false).unwrap(),
            ChangeKind::Delete
        );
        assert!(ChangeKind::classify(false, false).is_err());
    }

    #[test]
    fn test_event_kind_from_snapshots() {
        let create = ChangeEvent::created("p1", json!({"id": "p1"}));
        assert_eq!(create.kind().unwrap(), ChangeKind::Create);

        let update = ChangeEvent::updated("p1", json!({"v": 1}), json!({"v": 2}));
        assert_eq!(update.kind().unwrap(), ChangeKind::Update);

        let delete = ChangeEvent::deleted("p1", json!({"id": "p1"}));
        assert_eq!(delete.kind().unwrap(), ChangeKind::Delete);

        let invalid = ChangeEvent {
            record_id: "p1".to_string(),
            before: None,
            after: None,
            event_id: "evt-9".to_string(),
        };
        match invalid.kind() {
            Err(RelayError::InvalidEventShape { event_id }) => assert_eq!(event_id, "evt-9"),
            other => panic!("expected InvalidEventShape, got {:?}", other),
        }
    }

    #[test]
    fn test_work_message_wire_format() {
        let msg = WorkMessage::new("1", ChangeKind::Create);
        let bytes = msg.to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({"data": {"product_id": "1", "event_type": "create"}})
        );

        let restored = WorkMessage::from_bytes(&bytes).unwrap();
        assert_eq!(restored, msg);
        assert_eq!(restored.ordering_key(), "1");
    }

    #[test]
    fn test_trigger_wire_format() {
        let bytes = TriggerMessage::new().to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"trigger_it": true}));

        let restored = TriggerMessage::from_bytes(&bytes).unwrap();
        assert!(restored.trigger_it);
        assert!(TriggerMessage::from_bytes(b"not json").is_err());
    }

    #[test]
    fn test_poison_payload_rejected() {
        assert!(WorkMessage::from_bytes(b"not json").is_err());
        // Missing wrapper is also poison
        assert!(WorkMessage::from_bytes(br#"{"product_id":"1","event_type":"create"}"#).is_err());
    }
}
