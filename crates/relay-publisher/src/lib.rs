//! # Relay Publisher
//!
//! Stage one of the doc-sync relay: classifies document change events and
//! fans them out onto the bus as ordered work messages plus wake-up
//! triggers for the drain stage.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let sink = JetStreamSink::connect(sink_config).await?;
//! let publisher = FanOutPublisher::new(sink);
//! publisher.publish(&event).await?;
//! ```

pub mod fanout;
pub mod sink;

pub use fanout::*;
pub use sink::*;
