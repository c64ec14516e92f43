//! switchyard-orchestrator — the blue/green deployment state machine.
//!
//! A deployment moves a service from its source revision to a target
//! revision: the target first takes the test endpoint, then production
//! traffic shifts over per a `ShiftPlan`, gated each tick on the alarm gate
//! and health monitor. A breach rolls production back to the source within
//! one tick; a clean bake commits.
//!
//! # Components
//!
//! - **`machine`** — Pure transition logic over a `DeploymentRecord`
//! - **`orchestrator`** — Driver tasks: tick loop, cancellation, resume,
//!   retries, event emission
//! - **`registry`** — Revision registry boundary
//!
//! # State machine
//!
//! ```text
//! Pending → TrafficShifting → Baking → Complete
//!                 │              │
//!                 └──────┬───────┘
//!                        ▼
//!                  RollingBack → RolledBack
//!
//! (Failed is reachable from any non-terminal state.)
//! ```

pub mod error;
pub mod machine;
pub mod orchestrator;
pub mod registry;

pub use error::{OrchestratorError, OrchestratorResult};
pub use machine::{Action, DeploymentMachine};
pub use orchestrator::{DeploymentRequest, Orchestrator, OrchestratorConfig};
pub use registry::{RevisionRegistry, StoreRevisionRegistry};
