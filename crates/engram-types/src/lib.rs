//! Core types for the Engram substrate: the correlation data model, graph
//! node model, secret references, the shared error taxonomy, the injected
//! time source, and the `MemoryBus` trait that agents interact with.

pub mod bus;
pub mod correlation;
pub mod error;
pub mod node;
pub mod secret;
pub mod time;

pub use bus::MemoryBus;
pub use error::{EngramError, EngramResult};
pub use time::TimeSource;
