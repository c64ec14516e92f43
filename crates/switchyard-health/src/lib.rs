//! switchyard-health — health signal tracking for switchyard deployments.
//!
//! External telemetry collectors feed `HealthSample`s into the
//! `HealthMonitor`; the orchestrator reads a per-revision `HealthVerdict`
//! each tick. A revision with too little signal is `Unknown`, which holds a
//! deployment in place rather than failing it.

pub mod monitor;

pub use monitor::{HealthMonitor, HealthPolicy, HealthVerdict};
