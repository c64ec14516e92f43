//! switchyard-state — embedded state store for switchyard.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for revisions, deployments, routing snapshots, telemetry,
//! and the deployment event log.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{deployment_id}:{seq}`, `{metric}:{revision}:{ts}`)
//! enable prefix scans for related records; numeric key components are
//! zero-padded so lexicographic order matches sequence order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
