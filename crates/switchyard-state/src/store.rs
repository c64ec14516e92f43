//! StateStore — redb-backed state persistence for switchyard.
//!
//! Provides typed CRUD operations over revisions, deployments, routing
//! snapshots, telemetry, and the deployment event log. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(ROUTES).map_err(map_err!(Table))?;
        txn.open_table(EVENTS).map_err(map_err!(Table))?;
        txn.open_table(METRIC_POINTS).map_err(map_err!(Table))?;
        txn.open_table(HEALTH_SAMPLES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Revisions ──────────────────────────────────────────────────

    /// Insert a revision. Revisions are immutable; re-registering the same
    /// id overwrites with identical content in practice.
    pub fn put_revision(&self, revision: &Revision) -> StateResult<()> {
        let value = serde_json::to_vec(revision).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            table
                .insert(revision.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(revision = %revision.id, "revision stored");
        Ok(())
    }

    /// Get a revision by id.
    pub fn get_revision(&self, id: &str) -> StateResult<Option<Revision>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let revision: Revision =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(revision))
            }
            None => Ok(None),
        }
    }

    /// List all registered revisions.
    pub fn list_revisions(&self) -> StateResult<Vec<Revision>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let revision: Revision =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(revision);
        }
        Ok(results)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment record.
    pub fn put_deployment(&self, record: &DeploymentRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %record.id, state = %record.state, "deployment stored");
        Ok(())
    }

    /// Get a deployment record by id.
    pub fn get_deployment(&self, id: &str) -> StateResult<Option<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DeploymentRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all deployment records, terminal ones included.
    pub fn list_deployments(&self) -> StateResult<Vec<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: DeploymentRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// The currently active (non-terminal) deployment, if any.
    ///
    /// At most one deployment is active at a time; the orchestrator
    /// enforces this before creating a new record.
    pub fn active_deployment(&self) -> StateResult<Option<DeploymentRecord>> {
        let deployments = self.list_deployments()?;
        Ok(deployments.into_iter().find(|d| !d.state.is_terminal()))
    }

    // ── Routes ─────────────────────────────────────────────────────

    /// Insert or update a routing snapshot for an endpoint.
    pub fn put_route(&self, record: &RoutingRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROUTES).map_err(map_err!(Table))?;
            table
                .insert(record.table_key(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the routing snapshot for an endpoint.
    pub fn get_route(&self, endpoint: Endpoint) -> StateResult<Option<RoutingRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROUTES).map_err(map_err!(Table))?;
        match table.get(endpoint.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: RoutingRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Delete an endpoint's routing snapshot. Returns true if it existed.
    pub fn delete_route(&self, endpoint: Endpoint) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ROUTES).map_err(map_err!(Table))?;
            existed = table
                .remove(endpoint.as_str())
                .map_err(map_err!(Write))?
                .is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Append a deployment event, assigning the next sequence number.
    ///
    /// Sequence assignment and insertion happen in a single write
    /// transaction, so concurrent appends for the same deployment cannot
    /// collide on a key.
    pub fn append_event(
        &self,
        deployment_id: &str,
        from_state: DeploymentState,
        to_state: DeploymentState,
        timestamp: u64,
        reason: Option<String>,
    ) -> StateResult<DeploymentEvent> {
        let prefix = format!("{deployment_id}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let event;
        {
            let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            let mut seq = 0u64;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if key.value().starts_with(&prefix) {
                    seq += 1;
                }
            }
            event = DeploymentEvent {
                deployment_id: deployment_id.to_string(),
                seq,
                from_state,
                to_state,
                timestamp,
                reason,
            };
            let value = serde_json::to_vec(&event).map_err(map_err!(Serialize))?;
            let key = event.table_key();
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            deployment = %deployment_id,
            from = %from_state,
            to = %to_state,
            "event appended"
        );
        Ok(event)
    }

    /// List all events for a deployment in sequence order.
    pub fn list_events(&self, deployment_id: &str) -> StateResult<Vec<DeploymentEvent>> {
        let prefix = format!("{deployment_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let event: DeploymentEvent =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(event);
            }
        }
        Ok(results)
    }

    // ── Telemetry ──────────────────────────────────────────────────

    /// Append a telemetry datapoint for a metric stream.
    pub fn append_metric_point(
        &self,
        selector: &MetricSelector,
        point: &MetricPoint,
    ) -> StateResult<()> {
        let key = format!("{}:{:020}", selector.key(), point.timestamp);
        let value = serde_json::to_vec(point).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(METRIC_POINTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List datapoints for a metric stream with `timestamp >= since`.
    pub fn list_metric_points(
        &self,
        selector: &MetricSelector,
        since: u64,
    ) -> StateResult<Vec<MetricPoint>> {
        let prefix = format!("{}:", selector.key());
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRIC_POINTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let point: MetricPoint =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if point.timestamp >= since {
                    results.push(point);
                }
            }
        }
        Ok(results)
    }

    /// Append a health sample from a telemetry collector.
    pub fn append_health_sample(&self, sample: &HealthSample) -> StateResult<()> {
        let key = sample.table_key();
        let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HEALTH_SAMPLES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List health samples (any revision) with `timestamp >= since`.
    pub fn list_health_samples_since(&self, since: u64) -> StateResult<Vec<HealthSample>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HEALTH_SAMPLES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let sample: HealthSample =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if sample.timestamp >= since {
                results.push(sample);
            }
        }
        Ok(results)
    }
}
