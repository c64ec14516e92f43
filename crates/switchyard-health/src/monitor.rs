//! Health monitor — windowed health samples per revision.
//!
//! Telemetry collectors append `HealthSample`s; the orchestrator asks for a
//! verdict per revision. Samples live in a bounded window (capped by count
//! and by age), so a revision's verdict always reflects recent signal.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use switchyard_state::{HealthSample, RevisionId};

/// Health verdict for a revision over its sample window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Unhealthy ratio is below the policy threshold.
    Healthy,
    /// Unhealthy ratio is at or above the policy threshold.
    Unhealthy,
    /// Not enough samples yet. Treated as not-yet-healthy, never as failure.
    Unknown,
}

/// Thresholds governing verdict computation.
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Maximum samples retained per revision.
    pub max_samples: usize,
    /// Maximum sample age relative to the newest sample.
    pub max_age: Duration,
    /// Minimum samples required before a verdict other than Unknown.
    pub min_samples: usize,
    /// Unhealthy ratio at or above which the verdict is Unhealthy.
    pub unhealthy_ratio: f64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            max_samples: 20,
            max_age: Duration::from_secs(300),
            min_samples: 3,
            unhealthy_ratio: 0.2,
        }
    }
}

/// Tracks health signal per revision. Safe for concurrent appends from
/// multiple telemetry sources and concurrent verdict reads.
pub struct HealthMonitor {
    policy: HealthPolicy,
    /// Per-revision sample windows, newest at the back.
    windows: Arc<RwLock<HashMap<RevisionId, VecDeque<HealthSample>>>>,
}

impl HealthMonitor {
    /// Create a monitor with the default policy.
    pub fn new() -> Self {
        Self::with_policy(HealthPolicy::default())
    }

    /// Create a monitor with a custom policy.
    pub fn with_policy(policy: HealthPolicy) -> Self {
        Self {
            policy,
            windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Append a sample to the revision's window, trimming by count and age.
    pub async fn record(&self, sample: HealthSample) {
        let mut windows = self.windows.write().await;
        let window = windows.entry(sample.revision.clone()).or_default();
        let newest = sample.timestamp;
        window.push_back(sample);

        while window.len() > self.policy.max_samples {
            window.pop_front();
        }
        let cutoff = newest.saturating_sub(self.policy.max_age.as_secs());
        while window.front().is_some_and(|s| s.timestamp < cutoff) {
            window.pop_front();
        }
    }

    /// Verdict for a revision over its current window.
    pub async fn verdict(&self, revision: &str) -> HealthVerdict {
        let windows = self.windows.read().await;
        let window = match windows.get(revision) {
            Some(w) => w,
            None => return HealthVerdict::Unknown,
        };
        if window.len() < self.policy.min_samples {
            debug!(
                %revision,
                samples = window.len(),
                needed = self.policy.min_samples,
                "not enough health samples"
            );
            return HealthVerdict::Unknown;
        }

        let (healthy, unhealthy) = window.iter().fold((0u64, 0u64), |(h, u), s| {
            (h + s.healthy_count as u64, u + s.unhealthy_count as u64)
        });
        let total = healthy + unhealthy;
        if total == 0 {
            // Samples exist but report no hosts at all.
            return HealthVerdict::Unknown;
        }

        let ratio = unhealthy as f64 / total as f64;
        if ratio >= self.policy.unhealthy_ratio {
            warn!(%revision, ratio, "revision unhealthy");
            HealthVerdict::Unhealthy
        } else {
            HealthVerdict::Healthy
        }
    }

    /// Drop a revision's window entirely (after teardown).
    pub async fn forget(&self, revision: &str) {
        let mut windows = self.windows.write().await;
        windows.remove(revision);
    }

    /// Number of samples currently held for a revision.
    pub async fn sample_count(&self, revision: &str) -> usize {
        let windows = self.windows.read().await;
        windows.get(revision).map_or(0, |w| w.len())
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
