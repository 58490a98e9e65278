//! Secrets detection and redaction for the Engram substrate.
//!
//! Every payload headed for storage runs through [`SecretsPipeline`] in
//! incoming mode; recalled payloads run through outgoing mode, which only
//! decapsulates for allow-listed action types. Captured values sit
//! AES-256-GCM encrypted in the shared database.

pub mod patterns;
pub mod pipeline;
pub mod store;

pub use pipeline::{SecretsPipeline, DEFAULT_ALLOW_LIST};
pub use store::{MasterKey, SecretsStore};
