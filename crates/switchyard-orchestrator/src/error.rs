//! Orchestrator error types.

use thiserror::Error;

/// Result type alias for orchestration operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors that can occur while orchestrating a deployment.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A precondition for starting a deployment does not hold, e.g. another
    /// deployment is still active. Terminal: surfaces to the caller.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    /// Reverting production traffic kept failing; the deployment is marked
    /// Failed and requires operator intervention.
    #[error("rollback failed after {attempts} attempts: {reason}")]
    RollbackFailed { attempts: u32, reason: String },

    #[error("router error: {0}")]
    Router(#[from] switchyard_router::RouterError),

    #[error("state store error: {0}")]
    State(#[from] switchyard_state::StateError),

    #[error("metric source error: {0}")]
    Gate(#[from] switchyard_gate::GateError),
}
