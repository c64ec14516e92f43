//! Domain types for the switchyard state store.
//!
//! These types represent the persisted state of revisions, routing tables,
//! deployments, alarm telemetry, and the deployment event log. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unique identifier for a service revision.
pub type RevisionId = String;

/// Unique identifier for a deployment.
pub type DeploymentId = String;

// ── Revision ───────────────────────────────────────────────────────

/// A deployable service revision. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Revision {
    pub id: RevisionId,
    /// Artifact reference (image digest, task definition, bundle URI).
    pub artifact: String,
    /// Unix timestamp (seconds) when the revision was registered.
    pub created_at: u64,
}

// ── Endpoint & routing ─────────────────────────────────────────────

/// Logical traffic entry point. Production receives live traffic; Test
/// fronts the candidate revision for pre-cutover validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Production,
    Test,
}

impl Endpoint {
    /// Stable string form, used as a table key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Production => "production",
            Endpoint::Test => "test",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted snapshot of an endpoint's routing table.
///
/// Weights are integer percents. A non-empty table always sums to 100.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingRecord {
    pub endpoint: Endpoint,
    pub weights: BTreeMap<RevisionId, u32>,
    /// Unix timestamp (seconds) of the last mutation.
    pub updated_at: u64,
}

impl RoutingRecord {
    /// Table key for this record.
    pub fn table_key(&self) -> &'static str {
        self.endpoint.as_str()
    }
}

// ── Deployment ─────────────────────────────────────────────────────

/// Traffic shift schedule for moving production traffic to the target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShiftPlan {
    /// Shift `percent` first, then the remainder after one interval.
    TimeBasedCanary { percent: u32, interval_secs: u64 },
    /// Shift `percent` every interval until the target holds 100.
    TimeBasedLinear { percent: u32, interval_secs: u64 },
    /// Move all traffic in a single step.
    AllAtOnce,
}

impl Default for ShiftPlan {
    fn default() -> Self {
        Self::TimeBasedCanary {
            percent: 20,
            interval_secs: 60,
        }
    }
}

impl ShiftPlan {
    /// Seconds between shift steps; `None` for a single-step plan.
    pub fn interval_secs(&self) -> Option<u64> {
        match self {
            ShiftPlan::TimeBasedCanary { interval_secs, .. }
            | ShiftPlan::TimeBasedLinear { interval_secs, .. } => Some(*interval_secs),
            ShiftPlan::AllAtOnce => None,
        }
    }

    /// The next production weight for the target revision, given its
    /// current weight. Never exceeds 100.
    pub fn next_weight(&self, current: u32) -> u32 {
        match self {
            ShiftPlan::TimeBasedCanary { percent, .. } => {
                if current == 0 {
                    (*percent).min(100)
                } else {
                    100
                }
            }
            ShiftPlan::TimeBasedLinear { percent, .. } => (current + percent).min(100),
            ShiftPlan::AllAtOnce => 100,
        }
    }
}

/// Lifecycle state of a deployment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Created, not yet started.
    Pending,
    /// Production traffic is moving toward the target revision.
    TrafficShifting,
    /// Target holds 100% of production; waiting out the termination window.
    Baking,
    /// Committed. The source revision can be torn down.
    Complete,
    /// Reverting production traffic to the source revision.
    RollingBack,
    /// Reverted. Production is back on the source revision.
    RolledBack,
    /// Unrecoverable error; operator intervention required.
    Failed,
}

impl DeploymentState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Complete | DeploymentState::RolledBack | DeploymentState::Failed
        )
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentState::Pending => "pending",
            DeploymentState::TrafficShifting => "traffic_shifting",
            DeploymentState::Baking => "baking",
            DeploymentState::Complete => "complete",
            DeploymentState::RollingBack => "rolling_back",
            DeploymentState::RolledBack => "rolled_back",
            DeploymentState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The durable record of a blue/green deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub source_revision: RevisionId,
    pub target_revision: RevisionId,
    pub state: DeploymentState,
    pub shift_plan: ShiftPlan,
    /// Alarm rules gating this deployment. Kept on the record so a restart
    /// resumes with the same gates.
    pub alarm_rules: Vec<AlarmRule>,
    /// Seconds to hold in Baking before committing.
    pub termination_wait_secs: u64,
    /// Unix timestamp (seconds) when Baking was entered, if it has been.
    pub baking_since: Option<u64>,
    /// Why the deployment left the happy path (breach, cancel, failure).
    pub reason: Option<String>,
    /// Unix timestamp (seconds) when the deployment started.
    pub started_at: u64,
    /// Unix timestamp (seconds) of the last state change.
    pub updated_at: u64,
}

// ── Alarms & telemetry ─────────────────────────────────────────────

/// Which metric an alarm rule watches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Count of instances failing their target-group health check.
    UnhealthyHostCount,
    /// Count of HTTP 5xx responses served by the revision.
    Http5xxCount,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::UnhealthyHostCount => "unhealthy_host_count",
            MetricKind::Http5xxCount => "http_5xx_count",
        }
    }
}

/// Selects a metric stream: one kind of signal for one revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricSelector {
    pub kind: MetricKind,
    pub revision: RevisionId,
}

impl MetricSelector {
    /// Key prefix under which datapoints for this stream are stored.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.revision)
    }
}

/// An alarm predicate: breached when the metric sits at or above
/// `threshold` for `evaluation_periods` consecutive periods of
/// `period_secs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlarmRule {
    pub name: String,
    pub selector: MetricSelector,
    pub threshold: f64,
    pub evaluation_periods: u32,
    pub period_secs: u64,
}

/// A single telemetry datapoint appended by an external collector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricPoint {
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub value: f64,
}

/// A health observation for one revision at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSample {
    pub revision: RevisionId,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub healthy_count: u32,
    pub unhealthy_count: u32,
}

impl HealthSample {
    /// Table key: `{revision}:{timestamp}` (timestamp zero-padded so
    /// lexicographic key order matches time order).
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.revision, self.timestamp)
    }
}

// ── Events ─────────────────────────────────────────────────────────

/// A state transition on a deployment, appended to the durable event log
/// and broadcast to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentEvent {
    pub deployment_id: DeploymentId,
    /// Monotonic per-deployment sequence number.
    pub seq: u64,
    pub from_state: DeploymentState,
    pub to_state: DeploymentState,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub reason: Option<String>,
}

impl DeploymentEvent {
    /// Table key: `{deployment_id}:{seq}` (seq zero-padded for ordering).
    pub fn table_key(&self) -> String {
        format!("{}:{:08}", self.deployment_id, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canary_plan_two_steps() {
        let plan = ShiftPlan::TimeBasedCanary {
            percent: 20,
            interval_secs: 60,
        };
        assert_eq!(plan.next_weight(0), 20);
        assert_eq!(plan.next_weight(20), 100);
    }

    #[test]
    fn linear_plan_increments_and_caps() {
        let plan = ShiftPlan::TimeBasedLinear {
            percent: 30,
            interval_secs: 60,
        };
        assert_eq!(plan.next_weight(0), 30);
        assert_eq!(plan.next_weight(30), 60);
        assert_eq!(plan.next_weight(60), 90);
        assert_eq!(plan.next_weight(90), 100);
    }

    #[test]
    fn all_at_once_jumps_to_full() {
        assert_eq!(ShiftPlan::AllAtOnce.next_weight(0), 100);
    }

    #[test]
    fn terminal_states() {
        assert!(DeploymentState::Complete.is_terminal());
        assert!(DeploymentState::RolledBack.is_terminal());
        assert!(DeploymentState::Failed.is_terminal());
        assert!(!DeploymentState::TrafficShifting.is_terminal());
        assert!(!DeploymentState::Baking.is_terminal());
    }

    #[test]
    fn event_key_ordering() {
        let mk = |seq| DeploymentEvent {
            deployment_id: "d-1".to_string(),
            seq,
            from_state: DeploymentState::Pending,
            to_state: DeploymentState::TrafficShifting,
            timestamp: 0,
            reason: None,
        };
        assert!(mk(2).table_key() < mk(10).table_key());
    }

    #[test]
    fn selector_key_includes_kind_and_revision() {
        let sel = MetricSelector {
            kind: MetricKind::Http5xxCount,
            revision: "rev-b".to_string(),
        };
        assert_eq!(sel.key(), "http_5xx_count:rev-b");
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&DeploymentState::RollingBack).unwrap();
        assert_eq!(json, "\"rolling_back\"");
    }
}
