//! Deployment state machine.
//!
//! Pure transition logic over a `DeploymentRecord`: each tick takes the
//! current alarm/health verdicts and the target's production weight, moves
//! the record through its lifecycle, and returns the routing action for the
//! driver to execute. Time is passed in, so every transition is
//! deterministic and unit-testable.

use tracing::{debug, info, warn};

use switchyard_health::HealthVerdict;
use switchyard_state::{DeploymentRecord, DeploymentState};

/// Routing action the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Route the target revision to 100% of the test endpoint.
    RegisterTest,
    /// Set the target revision's production weight (source rebalances).
    ShiftProduction { weight: u32 },
    /// Cut production back to the source revision and drain the test
    /// endpoint.
    Revert,
    /// Drain the test endpoint after a committed deployment.
    Finalize,
    /// Nothing to execute this tick.
    Hold,
}

/// Drives a single deployment's record through its state machine.
pub struct DeploymentMachine {
    record: DeploymentRecord,
    /// Whether an Unhealthy verdict (with alarms clear) forces rollback.
    /// Unknown never does; it holds in place.
    rollback_on_unhealthy: bool,
}

impl DeploymentMachine {
    pub fn new(record: DeploymentRecord, rollback_on_unhealthy: bool) -> Self {
        Self {
            record,
            rollback_on_unhealthy,
        }
    }

    /// The current record (persisted by the driver after each change).
    pub fn record(&self) -> &DeploymentRecord {
        &self.record
    }

    pub fn state(&self) -> DeploymentState {
        self.record.state
    }

    /// Begin the deployment: the target revision takes the test endpoint,
    /// production is untouched.
    pub fn start(&mut self, now: u64) -> Action {
        if self.record.state != DeploymentState::Pending {
            return Action::Hold;
        }
        self.transition(DeploymentState::TrafficShifting, now, None);
        info!(
            deployment = %self.record.id,
            target = %self.record.target_revision,
            "deployment started"
        );
        Action::RegisterTest
    }

    /// Advance one tick.
    ///
    /// `breach` is the alarm gate's verdict (reason if breached), `health`
    /// the target revision's verdict, and `target_production_weight` the
    /// target's current production weight. Gates are checked every tick;
    /// the shift itself only advances once the plan's interval has elapsed
    /// since the previous shift.
    pub fn tick(
        &mut self,
        now: u64,
        breach: Option<&str>,
        health: HealthVerdict,
        target_production_weight: u32,
    ) -> Action {
        match self.record.state {
            DeploymentState::Pending
            | DeploymentState::Complete
            | DeploymentState::RolledBack
            | DeploymentState::Failed => Action::Hold,

            // Revert not yet confirmed; keep asking for it.
            DeploymentState::RollingBack => Action::Revert,

            DeploymentState::TrafficShifting => {
                if let Some(action) = self.check_gates(now, breach, health) {
                    return action;
                }
                if health != HealthVerdict::Healthy {
                    // Alarms clear but health not yet positive: not-ready,
                    // hold without advancing or rolling back.
                    debug!(deployment = %self.record.id, ?health, "holding, health not positive");
                    return Action::Hold;
                }
                if !self.shift_due(now) {
                    return Action::Hold;
                }

                let next = self.record.shift_plan.next_weight(target_production_weight);
                if next >= 100 {
                    self.record.baking_since = Some(now);
                    self.transition(DeploymentState::Baking, now, None);
                    info!(deployment = %self.record.id, "production fully shifted, baking");
                    Action::ShiftProduction { weight: 100 }
                } else {
                    debug!(
                        deployment = %self.record.id,
                        from = target_production_weight,
                        to = next,
                        "shifting production traffic"
                    );
                    self.record.updated_at = now;
                    Action::ShiftProduction { weight: next }
                }
            }

            DeploymentState::Baking => {
                if let Some(action) = self.check_gates(now, breach, health) {
                    return action;
                }
                let since = self.record.baking_since.unwrap_or(now);
                if now.saturating_sub(since) >= self.record.termination_wait_secs {
                    self.transition(DeploymentState::Complete, now, None);
                    info!(deployment = %self.record.id, "deployment complete");
                    Action::Finalize
                } else {
                    Action::Hold
                }
            }
        }
    }

    /// Request cancellation. A no-op on terminal deployments.
    pub fn cancel(&mut self, now: u64) -> Action {
        match self.record.state {
            s if s.is_terminal() => Action::Hold,
            DeploymentState::RollingBack => Action::Revert,
            _ => {
                self.roll_back(now, "canceled by operator");
                Action::Revert
            }
        }
    }

    /// The driver confirmed production is back on the source revision and
    /// the test endpoint is drained.
    pub fn confirm_reverted(&mut self, now: u64) {
        if self.record.state == DeploymentState::RollingBack {
            self.transition(DeploymentState::RolledBack, now, None);
            info!(deployment = %self.record.id, "rollback confirmed");
        }
    }

    /// Mark the deployment failed. Terminal; requires operator intervention.
    pub fn fail(&mut self, now: u64, reason: &str) {
        if !self.record.state.is_terminal() {
            warn!(deployment = %self.record.id, reason, "deployment failed");
            self.transition(DeploymentState::Failed, now, Some(reason.to_string()));
        }
    }

    /// Breach and health gates shared by TrafficShifting and Baking.
    fn check_gates(
        &mut self,
        now: u64,
        breach: Option<&str>,
        health: HealthVerdict,
    ) -> Option<Action> {
        if let Some(reason) = breach {
            self.roll_back(now, reason);
            return Some(Action::Revert);
        }
        if health == HealthVerdict::Unhealthy && self.rollback_on_unhealthy {
            self.roll_back(now, "target revision unhealthy");
            return Some(Action::Revert);
        }
        None
    }

    /// Whether the plan's interval has elapsed since the last shift (or
    /// since traffic shifting began).
    fn shift_due(&self, now: u64) -> bool {
        match self.record.shift_plan.interval_secs() {
            Some(interval) => now.saturating_sub(self.record.updated_at) >= interval,
            None => true,
        }
    }

    fn roll_back(&mut self, now: u64, reason: &str) {
        warn!(deployment = %self.record.id, reason, "rolling back");
        self.transition(DeploymentState::RollingBack, now, Some(reason.to_string()));
    }

    fn transition(&mut self, to: DeploymentState, now: u64, reason: Option<String>) {
        self.record.state = to;
        self.record.updated_at = now;
        if reason.is_some() {
            self.record.reason = reason;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_state::ShiftPlan;

    fn record(plan: ShiftPlan, wait: u64) -> DeploymentRecord {
        DeploymentRecord {
            id: "d-1".to_string(),
            source_revision: "rev-blue".to_string(),
            target_revision: "rev-green".to_string(),
            state: DeploymentState::Pending,
            shift_plan: plan,
            alarm_rules: Vec::new(),
            termination_wait_secs: wait,
            baking_since: None,
            reason: None,
            started_at: 0,
            updated_at: 0,
        }
    }

    fn linear20() -> ShiftPlan {
        ShiftPlan::TimeBasedLinear {
            percent: 20,
            interval_secs: 60,
        }
    }

    /// Walk a healthy machine through its shift ticks, returning the
    /// weights requested on the way.
    fn healthy_shift_weights(machine: &mut DeploymentMachine) -> Vec<u32> {
        let mut weights = Vec::new();
        let mut current = 0;
        let mut now = 0;
        while machine.state() == DeploymentState::TrafficShifting {
            now += 60;
            match machine.tick(now, None, HealthVerdict::Healthy, current) {
                Action::ShiftProduction { weight } => {
                    weights.push(weight);
                    current = weight;
                }
                other => panic!("unexpected action {other:?}"),
            }
        }
        weights
    }

    #[test]
    fn start_registers_test_endpoint() {
        let mut m = DeploymentMachine::new(record(linear20(), 60), true);
        assert_eq!(m.start(0), Action::RegisterTest);
        assert_eq!(m.state(), DeploymentState::TrafficShifting);
        // Starting twice does nothing.
        assert_eq!(m.start(1), Action::Hold);
    }

    #[test]
    fn linear_plan_reaches_baking_in_five_ticks() {
        let mut m = DeploymentMachine::new(record(linear20(), 60), true);
        m.start(0);
        let weights = healthy_shift_weights(&mut m);
        assert_eq!(weights, vec![20, 40, 60, 80, 100]);
        assert_eq!(m.state(), DeploymentState::Baking);
    }

    #[test]
    fn canary_plan_reaches_baking_in_two_ticks() {
        let plan = ShiftPlan::TimeBasedCanary {
            percent: 20,
            interval_secs: 60,
        };
        let mut m = DeploymentMachine::new(record(plan, 60), true);
        m.start(0);
        let weights = healthy_shift_weights(&mut m);
        assert_eq!(weights, vec![20, 100]);
    }

    #[test]
    fn shift_waits_for_plan_interval() {
        // Driver ticks every 60s but the plan only allows a step every
        // 600s; intermediate ticks must hold.
        let plan = ShiftPlan::TimeBasedLinear {
            percent: 20,
            interval_secs: 600,
        };
        let mut m = DeploymentMachine::new(record(plan, 60), true);
        m.start(0);

        assert_eq!(m.tick(60, None, HealthVerdict::Healthy, 0), Action::Hold);
        assert_eq!(m.tick(120, None, HealthVerdict::Healthy, 0), Action::Hold);
        assert_eq!(
            m.tick(600, None, HealthVerdict::Healthy, 0),
            Action::ShiftProduction { weight: 20 }
        );
        // One driver tick after the shift: not due again yet.
        assert_eq!(m.tick(660, None, HealthVerdict::Healthy, 20), Action::Hold);
        assert_eq!(
            m.tick(1200, None, HealthVerdict::Healthy, 20),
            Action::ShiftProduction { weight: 40 }
        );
    }

    #[test]
    fn breach_is_checked_even_when_shift_is_not_due() {
        let plan = ShiftPlan::TimeBasedLinear {
            percent: 20,
            interval_secs: 600,
        };
        let mut m = DeploymentMachine::new(record(plan, 60), true);
        m.start(0);
        // Far before the next shift step, a breach still reverts.
        let action = m.tick(60, Some("http-5xx-rev-green"), HealthVerdict::Healthy, 0);
        assert_eq!(action, Action::Revert);
        assert_eq!(m.state(), DeploymentState::RollingBack);
    }

    #[test]
    fn all_at_once_reaches_baking_in_one_tick() {
        let mut m = DeploymentMachine::new(record(ShiftPlan::AllAtOnce, 60), true);
        m.start(0);
        assert_eq!(healthy_shift_weights(&mut m), vec![100]);
    }

    #[test]
    fn baking_completes_after_termination_wait() {
        let mut m = DeploymentMachine::new(record(linear20(), 60), true);
        m.start(0);
        healthy_shift_weights(&mut m);
        let since = m.record().baking_since.unwrap();

        // Wait not yet elapsed.
        assert_eq!(
            m.tick(since + 30, None, HealthVerdict::Healthy, 100),
            Action::Hold
        );
        assert_eq!(m.state(), DeploymentState::Baking);

        // Elapsed: commit and drain the test endpoint.
        assert_eq!(
            m.tick(since + 60, None, HealthVerdict::Healthy, 100),
            Action::Finalize
        );
        assert_eq!(m.state(), DeploymentState::Complete);
    }

    #[test]
    fn breach_mid_shift_rolls_back_within_one_tick() {
        let mut m = DeploymentMachine::new(record(linear20(), 60), true);
        m.start(0);
        m.tick(60, None, HealthVerdict::Healthy, 0);
        m.tick(120, None, HealthVerdict::Healthy, 20);
        // Weights now {source: 60, target: 40}; a breach arrives.
        let action = m.tick(180, Some("http-5xx-rev-green"), HealthVerdict::Healthy, 40);
        assert_eq!(action, Action::Revert);
        assert_eq!(m.state(), DeploymentState::RollingBack);
        assert_eq!(m.record().reason.as_deref(), Some("http-5xx-rev-green"));

        m.confirm_reverted(181);
        assert_eq!(m.state(), DeploymentState::RolledBack);
    }

    #[test]
    fn breach_during_baking_rolls_back() {
        let mut m = DeploymentMachine::new(record(linear20(), 600), true);
        m.start(0);
        healthy_shift_weights(&mut m);
        assert_eq!(m.state(), DeploymentState::Baking);

        let action = m.tick(400, Some("unhealthy-hosts-rev-green"), HealthVerdict::Healthy, 100);
        assert_eq!(action, Action::Revert);
        assert_eq!(m.state(), DeploymentState::RollingBack);
    }

    #[test]
    fn unknown_health_holds_without_advancing() {
        let mut m = DeploymentMachine::new(record(linear20(), 60), true);
        m.start(0);
        // Alarm clear, health unknown: not-ready, no advance, no rollback.
        assert_eq!(m.tick(60, None, HealthVerdict::Unknown, 0), Action::Hold);
        assert_eq!(m.state(), DeploymentState::TrafficShifting);
    }

    #[test]
    fn unhealthy_rolls_back_when_policy_enabled() {
        let mut m = DeploymentMachine::new(record(linear20(), 60), true);
        m.start(0);
        let action = m.tick(60, None, HealthVerdict::Unhealthy, 0);
        assert_eq!(action, Action::Revert);
        assert_eq!(m.state(), DeploymentState::RollingBack);
        assert_eq!(m.record().reason.as_deref(), Some("target revision unhealthy"));
    }

    #[test]
    fn unhealthy_holds_when_policy_disabled() {
        let mut m = DeploymentMachine::new(record(linear20(), 60), false);
        m.start(0);
        assert_eq!(m.tick(60, None, HealthVerdict::Unhealthy, 0), Action::Hold);
        assert_eq!(m.state(), DeploymentState::TrafficShifting);
    }

    #[test]
    fn cancel_is_idempotent_on_rolled_back() {
        let mut m = DeploymentMachine::new(record(linear20(), 60), true);
        m.start(0);
        assert_eq!(m.cancel(60), Action::Revert);
        assert_eq!(m.state(), DeploymentState::RollingBack);
        m.confirm_reverted(61);

        // Cancel twice more: state unchanged, same answer both times.
        assert_eq!(m.cancel(62), Action::Hold);
        assert_eq!(m.cancel(63), Action::Hold);
        assert_eq!(m.state(), DeploymentState::RolledBack);
    }

    #[test]
    fn rolling_back_keeps_requesting_revert_until_confirmed() {
        let mut m = DeploymentMachine::new(record(linear20(), 60), true);
        m.start(0);
        m.tick(60, Some("breach"), HealthVerdict::Healthy, 0);
        // The revert failed; next tick asks again.
        assert_eq!(m.tick(120, None, HealthVerdict::Healthy, 0), Action::Revert);
        assert_eq!(m.tick(180, None, HealthVerdict::Healthy, 0), Action::Revert);
        m.confirm_reverted(240);
        assert_eq!(m.state(), DeploymentState::RolledBack);
    }

    #[test]
    fn fail_is_terminal_from_any_state() {
        let mut m = DeploymentMachine::new(record(linear20(), 60), true);
        m.start(0);
        m.fail(60, "metric source unavailable after 5 attempts");
        assert_eq!(m.state(), DeploymentState::Failed);
        assert!(m.record().reason.is_some());

        // No further transitions.
        assert_eq!(m.tick(120, None, HealthVerdict::Healthy, 0), Action::Hold);
        assert_eq!(m.cancel(130), Action::Hold);
        m.fail(140, "again");
        assert_eq!(m.record().reason.as_deref(), Some("metric source unavailable after 5 attempts"));
    }

    #[test]
    fn resume_mid_shift_continues_from_persisted_weight() {
        // A record persisted in TrafficShifting with production at 40.
        let mut rec = record(linear20(), 60);
        rec.state = DeploymentState::TrafficShifting;
        let mut m = DeploymentMachine::new(rec, true);
        assert_eq!(
            m.tick(60, None, HealthVerdict::Healthy, 40),
            Action::ShiftProduction { weight: 60 }
        );
    }
}
