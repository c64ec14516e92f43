//! Traffic router error types.

use thiserror::Error;

/// Result type alias for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors that can occur during routing table mutations.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid weight {weight} for revision {revision}: {reason}")]
    InvalidWeight {
        weight: u32,
        revision: String,
        reason: String,
    },

    #[error("state store error: {0}")]
    State(#[from] switchyard_state::StateError),
}
