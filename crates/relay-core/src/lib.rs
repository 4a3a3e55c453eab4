//! # Relay Core
//!
//! Core types, strategy traits, and utilities for the doc-sync relay.
//!
//! The relay is a two-stage pipeline: change events on the authoritative
//! `products` collection are classified and fanned out onto a message bus,
//! and a triggered drain loop propagates them into a derived collection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌─────────────┐
//! │ ChangeEvent │────►│ FanOutPublisher  │────►│  bulk-work  │──┐
//! │  (external) │     │ (classify+fanout)│     │    topic    │  │
//! └─────────────┘     └────────┬─────────┘     └─────────────┘  │
//!                              │               ┌─────────────┐  │
//!                              └──────────────►│   trigger   │  │
//!                                              │    topic    │  │
//!                                              └──────┬──────┘  │
//!                                                     ▼         ▼
//!                                              ┌─────────────────┐
//!                                              │     Drainer     │
//!                                              │ pull→apply→ack  │
//!                                              └─────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod record;
pub mod strategy;

pub use config::*;
pub use error::*;
pub use event::*;
pub use metrics::*;
pub use record::*;
pub use strategy::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::RelayConfig;
    pub use crate::error::{RelayError, Result};
    pub use crate::event::{ChangeEvent, ChangeKind, TriggerMessage, WorkMessage};
    pub use crate::record::{DerivedRecord, Record};
    pub use crate::strategy::{Delivery, DerivedStore, RecordStore, WorkSink, WorkSource};
}
