//! Configuration types for the doc-sync relay
//!
//! Uses the `config` crate for layered configuration from files and environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for both relay stages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Message bus connection
    #[serde(default)]
    pub bus: BusConfig,

    /// Topic and subscription names
    #[serde(default)]
    pub topics: TopicsConfig,

    /// Document store connection and collection names
    #[serde(default)]
    pub store: StoreConfig,

    /// Drain loop tuning
    #[serde(default)]
    pub drain: DrainConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================================================
// Bus Configuration
// ============================================================================

/// Message bus connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus server URL
    #[serde(default = "default_bus_url")]
    pub url: String,

    /// Connection name (for monitoring)
    #[serde(default = "default_connection_name")]
    pub connection_name: String,
}

fn default_bus_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_connection_name() -> String {
    "doc-sync-relay".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: default_bus_url(),
            connection_name: default_connection_name(),
        }
    }
}

/// Topic and subscription names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    /// Ordered bulk-work topic
    #[serde(default = "default_work_topic")]
    pub work_topic: String,

    /// Unordered trigger topic
    #[serde(default = "default_trigger_topic")]
    pub trigger_topic: String,

    /// Work subscription name
    #[serde(default = "default_work_subscription")]
    pub work_subscription: String,

    /// Trigger subscription name
    #[serde(default = "default_trigger_subscription")]
    pub trigger_subscription: String,
}

fn default_work_topic() -> String {
    "bulk-products".to_string()
}

fn default_trigger_topic() -> String {
    "trigger-products".to_string()
}

fn default_work_subscription() -> String {
    "bulk-products-sub".to_string()
}

fn default_trigger_subscription() -> String {
    "trigger-products-sub".to_string()
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            work_topic: default_work_topic(),
            trigger_topic: default_trigger_topic(),
            work_subscription: default_work_subscription(),
            trigger_subscription: default_trigger_subscription(),
        }
    }
}

// ============================================================================
// Store Configuration
// ============================================================================

/// Document store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store base URL
    #[serde(default = "default_store_url")]
    pub base_url: String,

    /// Optional bearer token for authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Authoritative collection (read-only to the drainer)
    #[serde(default = "default_source_collection")]
    pub source_collection: String,

    /// Derived collection (drainer is sole writer/deleter)
    #[serde(default = "default_derived_collection")]
    pub derived_collection: String,

    /// Connection timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Request timeout
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_store_url() -> String {
    "http://localhost:8600".to_string()
}

fn default_source_collection() -> String {
    "products".to_string()
}

fn default_derived_collection() -> String {
    "other_product_model".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_url(),
            auth_token: None,
            source_collection: default_source_collection(),
            derived_collection: default_derived_collection(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

// ============================================================================
// Drain Configuration
// ============================================================================

/// Drain loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    /// Messages to pull per drain invocation
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Bounded wait for the work pull
    #[serde(with = "humantime_serde", default = "default_pull_wait")]
    pub pull_wait: Duration,

    /// Ack deadline on the work subscription; an unacked message becomes
    /// visible again once this lapses
    #[serde(with = "humantime_serde", default = "default_ack_deadline")]
    pub ack_deadline: Duration,

    /// Bounded wait for the trigger fetch between drain cycles
    #[serde(with = "humantime_serde", default = "default_trigger_wait")]
    pub trigger_wait: Duration,

    /// Trigger messages to fetch per wait window; the batch collapses
    /// into one backlog drain
    #[serde(default = "default_trigger_batch")]
    pub trigger_batch: usize,
}

fn default_max_messages() -> usize {
    40
}

fn default_pull_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_ack_deadline() -> Duration {
    Duration::from_secs(120)
}

fn default_trigger_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_trigger_batch() -> usize {
    64
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            pull_wait: default_pull_wait(),
            ack_deadline: default_ack_deadline(),
            trigger_wait: default_trigger_wait(),
            trigger_batch: default_trigger_batch(),
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl RelayConfig {
    /// Load configuration from file and environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default values
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add config file if specified
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Add environment variables with prefix RELAY_
        builder = builder.add_source(
            config::Environment::with_prefix("RELAY")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.topics.work_topic, "bulk-products");
        assert_eq!(cfg.topics.trigger_topic, "trigger-products");
        assert_eq!(cfg.topics.work_subscription, "bulk-products-sub");
        assert_eq!(cfg.store.source_collection, "products");
        assert_eq!(cfg.store.derived_collection, "other_product_model");
        assert_eq!(cfg.drain.max_messages, 40);
        assert_eq!(cfg.drain.pull_wait, Duration::from_secs(30));
        assert_eq!(cfg.drain.ack_deadline, Duration::from_secs(120));
        assert_eq!(cfg.drain.trigger_batch, 64);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let cfg = RelayConfig::load(None).unwrap();
        assert_eq!(cfg.drain.max_messages, 40);
        assert_eq!(cfg.observability.log_level, "info");
    }
}
