//! Metric source boundary.
//!
//! Telemetry lives outside the coordinator; a `MetricSource` answers
//! windowed queries for one metric stream. The store-backed implementation
//! reads datapoints that external collectors append to the state store.

use switchyard_state::{MetricPoint, MetricSelector, StateStore};
use thiserror::Error;

/// Datapoints for one metric stream, oldest first.
pub type TimeSeries = Vec<MetricPoint>;

/// Errors surfaced by metric queries.
#[derive(Debug, Error)]
pub enum GateError {
    /// The source could not answer. Transient: callers hold and retry,
    /// this is never counted as a breach.
    #[error("metric source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Supplies telemetry for alarm evaluation.
pub trait MetricSource: Send + Sync {
    /// Datapoints for `selector` with `timestamp >= since`.
    fn query(&self, selector: &MetricSelector, since: u64) -> Result<TimeSeries, GateError>;
}

/// Reads metric points that collectors persisted into the state store.
pub struct StoreMetricSource {
    state: StateStore,
}

impl StoreMetricSource {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

impl MetricSource for StoreMetricSource {
    fn query(&self, selector: &MetricSelector, since: u64) -> Result<TimeSeries, GateError> {
        self.state
            .list_metric_points(selector, since)
            .map_err(|e| GateError::SourceUnavailable(e.to_string()))
    }
}
