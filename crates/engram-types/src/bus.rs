//! The `MemoryBus` trait: the seam between the agent runtime and the memory
//! substrate. Front-ends, handlers, and producers talk to this trait; the
//! concrete service lives in `engram-memory`.

use crate::error::EngramResult;
use crate::node::{GraphNode, RecallQuery};
use async_trait::async_trait;
use std::collections::HashMap;

/// A single point in a unified time-series view.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeseriesDataPoint {
    /// Logical event time.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Metric name of the source row.
    pub metric_name: String,
    /// Numeric value.
    pub value: f64,
    /// Which correlation type produced the point.
    pub correlation_type: String,
    /// Tags carried by the source row.
    pub tags: HashMap<String, String>,
    /// `tags["scope"]` of the source row, when present.
    pub source: Option<String>,
}

/// Memory operations available to the agent runtime.
#[async_trait]
pub trait MemoryBus: Send + Sync {
    /// Store a node, redacting secrets on the way in. Identity-scope writes
    /// require wise-authority provenance.
    async fn memorize(&self, node: GraphNode, wa_authorized: bool) -> EngramResult<()>;

    /// Fetch nodes; secret references are decapsulated only for action types
    /// in the auto-decrypt allow-list.
    async fn recall(&self, query: RecallQuery, action_type: &str) -> EngramResult<Vec<GraphNode>>;

    /// Delete a node. Secrets it referenced are retained (logged, not
    /// collected).
    async fn forget(&self, node: &GraphNode) -> EngramResult<()>;
}
