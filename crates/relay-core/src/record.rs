//! Authoritative and derived record models
//!
//! The derived record is a projection of the authoritative record with
//! non-primitive fields (timestamps) flattened into plain strings, so the
//! derived store only ever sees JSON primitives.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Authoritative record, owned by the record store.
///
/// The drain loop only ever reads these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable id
    pub id: String,

    /// Display title
    pub title: String,

    /// Creation timestamp
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Last-update timestamp
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Builder: set creation timestamp
    pub fn with_created_at(mut self, ts: DateTime<Utc>) -> Self {
        self.created_at = Some(ts);
        self
    }

    /// Builder: set update timestamp
    pub fn with_updated_at(mut self, ts: DateTime<Utc>) -> Self {
        self.updated_at = Some(ts);
        self
    }
}

/// Projection of [`Record`] written into the derived collection.
///
/// Keyed by the same id; the drain loop is the sole writer and deleter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedRecord {
    pub id: String,
    pub title: String,

    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl DerivedRecord {
    /// Transform an authoritative record into its derived projection.
    ///
    /// Timestamps are normalized to RFC 3339 strings.
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            created_at: record
                .created_at
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            updated_at: record
                .updated_at
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }
}

impl From<&Record> for DerivedRecord {
    fn from(record: &Record) -> Self {
        Self::from_record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_transform_flattens_timestamps() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let record = Record::new("1", "Dummy Title")
            .with_created_at(ts)
            .with_updated_at(ts);

        let derived = DerivedRecord::from_record(&record);
        assert_eq!(derived.id, "1");
        assert_eq!(derived.title, "Dummy Title");
        assert_eq!(
            derived.created_at.as_deref(),
            Some("2024-05-01T12:30:00.000000Z")
        );

        // Serialized form holds only JSON primitives
        let value = serde_json::to_value(&derived).unwrap();
        assert!(value["createdAt"].is_string());
        assert!(value["updatedAt"].is_string());
    }

    #[test]
    fn test_transform_without_timestamps() {
        let record = Record::new("2", "Bare");
        let derived = DerivedRecord::from_record(&record);
        assert!(derived.created_at.is_none());

        let value = serde_json::to_value(&derived).unwrap();
        assert!(value.get("createdAt").is_none());
    }

    #[test]
    fn test_record_camel_case_wire_names() {
        let json = r#"{"id":"1","title":"T","createdAt":"2024-05-01T12:30:00Z"}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert!(record.created_at.is_some());
        assert!(record.updated_at.is_none());
    }
}
