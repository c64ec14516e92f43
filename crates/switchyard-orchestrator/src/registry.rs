//! Revision registry boundary.
//!
//! The deployment target (compute cluster, task scheduler) owns revision
//! metadata; the orchestrator only needs to register and look up revisions.
//! The store-backed implementation is used by the daemon and in tests.

use switchyard_state::{Revision, StateStore};

use crate::error::OrchestratorResult;

/// Registers and resolves service revisions.
pub trait RevisionRegistry: Send + Sync {
    /// Register a revision. Registering an identical revision twice is fine.
    fn register(&self, revision: &Revision) -> OrchestratorResult<()>;

    /// Look up a revision by id.
    fn get(&self, id: &str) -> OrchestratorResult<Option<Revision>>;
}

/// Keeps revisions in the switchyard state store.
pub struct StoreRevisionRegistry {
    state: StateStore,
}

impl StoreRevisionRegistry {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

impl RevisionRegistry for StoreRevisionRegistry {
    fn register(&self, revision: &Revision) -> OrchestratorResult<()> {
        self.state.put_revision(revision)?;
        Ok(())
    }

    fn get(&self, id: &str) -> OrchestratorResult<Option<Revision>> {
        Ok(self.state.get_revision(id)?)
    }
}
