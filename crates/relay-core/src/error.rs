//! Error types for the doc-sync relay
//!
//! Uses `thiserror` for ergonomic error handling with full context preservation.

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Primary error type for all relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Document store connection or request errors
    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A record that does not exist in the store
    #[error("Not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Message bus connection or messaging errors
    #[error("Bus error: {message}")]
    Bus {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Message serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A change event with neither a before nor an after snapshot
    #[error("Invalid event shape: neither snapshot present (event {event_id})")]
    InvalidEventShape { event_id: String },

    /// Operation timeout (a pull wait elapsing is the expected idle case)
    #[error("Timeout: {operation} exceeded {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Create a store error with source
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not-found error
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Create a bus error
    pub fn bus(message: impl Into<String>) -> Self {
        Self::Bus {
            message: message.into(),
            source: None,
        }
    }

    /// Create a bus error with source
    pub fn bus_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Bus {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a serialization error with source
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store { .. } | Self::Bus { .. } | Self::Timeout { .. }
        )
    }

    /// Check if error is transient (may resolve on its own)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is the idle pull-timeout case
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is a missing-record error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RelayError::timeout("pull", 30_000).is_transient());
        assert!(RelayError::bus("connection refused").is_retryable());
        assert!(!RelayError::not_found("products", "p1").is_retryable());
        assert!(RelayError::not_found("products", "p1").is_not_found());
    }

    #[test]
    fn test_invalid_event_shape_message() {
        let err = RelayError::InvalidEventShape {
            event_id: "evt-1".to_string(),
        };
        assert!(err.to_string().contains("evt-1"));
    }
}
