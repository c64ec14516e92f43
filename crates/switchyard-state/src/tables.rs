//! redb table definitions for the switchyard state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys zero-pad their numeric component so lexicographic
//! order matches sequence/time order for prefix scans.

use redb::TableDefinition;

/// Revisions keyed by `{revision_id}`.
pub const REVISIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("revisions");

/// Deployment records keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Routing snapshots keyed by endpoint name (`production`, `test`).
pub const ROUTES: TableDefinition<&str, &[u8]> = TableDefinition::new("routes");

/// Deployment events keyed by `{deployment_id}:{seq:08}`.
pub const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");

/// Telemetry datapoints keyed by `{metric_kind}:{revision}:{timestamp:020}`.
pub const METRIC_POINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("metric_points");

/// Health samples keyed by `{revision}:{timestamp:020}`.
pub const HEALTH_SAMPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("health_samples");
