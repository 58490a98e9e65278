//! Memory service for the Engram substrate.
//!
//! The orchestration point between producers (telemetry collector, audit
//! logger, action handlers) and the stores: graph writes go through the
//! secrets pipeline, metric/log events are dual-written into both the graph
//! and the correlation table, and `recall_timeseries` merges correlation
//! types into one unified view.

pub mod query;
pub mod service;

pub use query::ServiceStatus;
pub use service::MemoryService;
