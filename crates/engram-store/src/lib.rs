//! Embedded persistence for the Engram substrate.
//!
//! One SQLite file holds three tables behind three facades:
//! - **Correlation store**: the unified time-series/audit table
//! - **Graph node store**: `(id, scope)`-keyed memory entities
//! - **Schema runner**: transactional, ledgered migrations applied at open
//!
//! Stores are only reachable through [`Database`], which refuses to hand
//! them out unless every migration has been applied.

pub mod correlations;
pub mod database;
pub mod nodes;
pub mod schema;

mod timefmt;

pub use correlations::CorrelationStore;
pub use database::Database;
pub use nodes::GraphNodeStore;
