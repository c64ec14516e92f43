//! Alarm gate — evaluates alarm rules against telemetry streams.
//!
//! A rule breaches when its metric sits at or above the threshold in each
//! of the last `evaluation_periods` consecutive periods. Periods with no
//! datapoints break the streak: missing data is never treated as a breach.
//! Evaluation mutates nothing; the orchestrator polls it each tick.

use tracing::{debug, warn};

use switchyard_state::{AlarmRule, MetricKind, MetricSelector};

use crate::source::{GateError, MetricSource};

/// One breached rule in a report.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub rule: String,
    /// The offending value from the most recent period.
    pub value: f64,
    pub periods: u32,
}

/// Outcome of evaluating all rules at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct BreachReport {
    /// Unix timestamp (seconds) of the evaluation.
    pub evaluated_at: u64,
    pub breaches: Vec<Breach>,
}

impl BreachReport {
    pub fn has_breach(&self) -> bool {
        !self.breaches.is_empty()
    }
}

/// Evaluates a fixed set of alarm rules against a metric source.
pub struct AlarmGate {
    rules: Vec<AlarmRule>,
}

impl AlarmGate {
    pub fn new(rules: Vec<AlarmRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[AlarmRule] {
        &self.rules
    }

    /// Evaluate every rule at time `now`.
    pub fn evaluate(
        &self,
        source: &dyn MetricSource,
        now: u64,
    ) -> Result<BreachReport, GateError> {
        let mut breaches = Vec::new();
        for rule in &self.rules {
            if let Some(breach) = evaluate_rule(source, rule, now)? {
                warn!(
                    rule = %breach.rule,
                    value = breach.value,
                    periods = breach.periods,
                    "alarm breached"
                );
                breaches.push(breach);
            }
        }
        Ok(BreachReport {
            evaluated_at: now,
            breaches,
        })
    }
}

/// Check a single rule: at-or-above threshold in every one of the last
/// `evaluation_periods` periods.
fn evaluate_rule(
    source: &dyn MetricSource,
    rule: &AlarmRule,
    now: u64,
) -> Result<Option<Breach>, GateError> {
    let window = rule.period_secs * rule.evaluation_periods as u64;
    let since = now.saturating_sub(window);
    let series = source.query(&rule.selector, since)?;

    let mut latest_value = 0.0f64;
    for k in 0..rule.evaluation_periods {
        let end = now.saturating_sub(rule.period_secs * k as u64);
        let start = end.saturating_sub(rule.period_secs);
        // Worst value inside (start, end].
        let worst = series
            .iter()
            .filter(|p| p.timestamp > start && p.timestamp <= end)
            .map(|p| p.value)
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            });
        match worst {
            Some(v) if v >= rule.threshold => {
                if k == 0 {
                    latest_value = v;
                }
            }
            _ => {
                debug!(rule = %rule.name, period = k, "streak broken, no breach");
                return Ok(None);
            }
        }
    }
    Ok(Some(Breach {
        rule: rule.name.clone(),
        value: latest_value,
        periods: rule.evaluation_periods,
    }))
}

/// The stock rule set for a blue/green pair: unhealthy-host and 5xx alarms
/// on both revisions.
pub fn default_rules(source_revision: &str, target_revision: &str) -> Vec<AlarmRule> {
    let mut rules = Vec::new();
    for revision in [source_revision, target_revision] {
        rules.push(AlarmRule {
            name: format!("unhealthy-hosts-{revision}"),
            selector: MetricSelector {
                kind: MetricKind::UnhealthyHostCount,
                revision: revision.to_string(),
            },
            threshold: 1.0,
            evaluation_periods: 2,
            period_secs: 60,
        });
        rules.push(AlarmRule {
            name: format!("http-5xx-{revision}"),
            selector: MetricSelector {
                kind: MetricKind::Http5xxCount,
                revision: revision.to_string(),
            },
            threshold: 1.0,
            evaluation_periods: 1,
            period_secs: 60,
        });
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TimeSeries;
    use switchyard_state::MetricPoint;

    /// In-memory source for tests: a fixed list of (selector key, point).
    struct FakeSource {
        points: Vec<(String, MetricPoint)>,
        fail: bool,
    }

    impl FakeSource {
        fn new(points: Vec<(String, MetricPoint)>) -> Self {
            Self {
                points,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                points: Vec::new(),
                fail: true,
            }
        }
    }

    impl MetricSource for FakeSource {
        fn query(&self, selector: &MetricSelector, since: u64) -> Result<TimeSeries, GateError> {
            if self.fail {
                return Err(GateError::SourceUnavailable("collector offline".to_string()));
            }
            Ok(self
                .points
                .iter()
                .filter(|(key, p)| *key == selector.key() && p.timestamp >= since)
                .map(|(_, p)| *p)
                .collect())
        }
    }

    fn rule(name: &str, periods: u32) -> AlarmRule {
        AlarmRule {
            name: name.to_string(),
            selector: MetricSelector {
                kind: MetricKind::Http5xxCount,
                revision: "rev-green".to_string(),
            },
            threshold: 1.0,
            evaluation_periods: periods,
            period_secs: 60,
        }
    }

    fn pt(ts: u64, value: f64) -> (String, MetricPoint) {
        (
            "http_5xx_count:rev-green".to_string(),
            MetricPoint {
                timestamp: ts,
                value,
            },
        )
    }

    #[test]
    fn clean_metrics_no_breach() {
        let source = FakeSource::new(vec![pt(950, 0.0), pt(990, 0.0)]);
        let gate = AlarmGate::new(vec![rule("5xx", 1)]);
        let report = gate.evaluate(&source, 1000).unwrap();
        assert!(!report.has_breach());
    }

    #[test]
    fn single_period_breach() {
        let source = FakeSource::new(vec![pt(990, 3.0)]);
        let gate = AlarmGate::new(vec![rule("5xx", 1)]);
        let report = gate.evaluate(&source, 1000).unwrap();
        assert!(report.has_breach());
        assert_eq!(report.breaches[0].rule, "5xx");
        assert_eq!(report.breaches[0].value, 3.0);
    }

    #[test]
    fn breach_requires_consecutive_periods() {
        // Two evaluation periods of 60s. Bad value only in the newest
        // period: streak of one, no breach.
        let source = FakeSource::new(vec![pt(990, 3.0), pt(920, 0.0)]);
        let gate = AlarmGate::new(vec![rule("5xx", 2)]);
        assert!(!gate.evaluate(&source, 1000).unwrap().has_breach());

        // Bad values in both periods: breach.
        let source = FakeSource::new(vec![pt(990, 3.0), pt(920, 2.0)]);
        assert!(gate.evaluate(&source, 1000).unwrap().has_breach());
    }

    #[test]
    fn missing_period_breaks_streak() {
        // Newest period breaches, older period has no datapoints at all.
        let source = FakeSource::new(vec![pt(990, 3.0)]);
        let gate = AlarmGate::new(vec![rule("5xx", 2)]);
        assert!(!gate.evaluate(&source, 1000).unwrap().has_breach());
    }

    #[test]
    fn evaluation_near_epoch_does_not_underflow() {
        // `now` smaller than the full evaluation window: older periods
        // clamp to empty instead of wrapping.
        let source = FakeSource::new(vec![pt(10, 3.0)]);
        let gate = AlarmGate::new(vec![rule("5xx", 2)]);
        assert!(!gate.evaluate(&source, 30).unwrap().has_breach());
    }

    #[test]
    fn threshold_is_at_or_above() {
        let source = FakeSource::new(vec![pt(990, 1.0)]);
        let gate = AlarmGate::new(vec![rule("5xx", 1)]);
        assert!(gate.evaluate(&source, 1000).unwrap().has_breach());
    }

    #[test]
    fn source_failure_propagates() {
        let gate = AlarmGate::new(vec![rule("5xx", 1)]);
        let err = gate.evaluate(&FakeSource::failing(), 1000).unwrap_err();
        assert!(matches!(err, GateError::SourceUnavailable(_)));
    }

    #[test]
    fn default_rules_cover_both_revisions() {
        let rules = default_rules("rev-blue", "rev-green");
        assert_eq!(rules.len(), 4);
        assert!(rules.iter().any(|r| r.name == "unhealthy-hosts-rev-blue"));
        assert!(rules.iter().any(|r| r.name == "http-5xx-rev-green"));
        // Unhealthy-host rules need two consecutive periods, 5xx only one.
        for r in &rules {
            match r.selector.kind {
                MetricKind::UnhealthyHostCount => assert_eq!(r.evaluation_periods, 2),
                MetricKind::Http5xxCount => assert_eq!(r.evaluation_periods, 1),
            }
        }
    }
}
