//! switchyard-router — weighted traffic routing for blue/green deployments.
//!
//! Maintains per-endpoint routing tables (revision → integer percent) with a
//! hard sum-to-100 invariant, proportional rebalancing on every shift, and
//! atomic cutover. Every mutation persists a snapshot through
//! `switchyard-state`, so tables survive a process restart.

pub mod error;
pub mod router;

pub use error::{RouterError, RouterResult};
pub use router::{RoutingTable, TrafficRouter};
