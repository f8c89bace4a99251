//! Observability for the replication layer
//!
//! - Structured JSON logging routed through `tracing`
//! - Typed lifecycle events
//! - Monotonic counters
//!
//! ```ignore
//! use wsrep_core::observability::{Event, Logger};
//!
//! Logger::info(Event::CertifyOk, &[("trx_id", "42"), ("seqno", "7")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
