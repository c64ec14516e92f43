//! Deployment orchestrator — spawns and supervises driver tasks.
//!
//! Each active deployment gets one background task that owns its state
//! machine and ticks it at a fixed interval: poll the alarm gate and health
//! monitor, advance the machine, execute the resulting routing action, then
//! persist the record and emit events. One task per deployment means all
//! mutations of a deployment record are serialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use switchyard_gate::{AlarmGate, MetricSource, default_rules};
use switchyard_health::HealthMonitor;
use switchyard_router::TrafficRouter;
use switchyard_state::{
    AlarmRule, DeploymentEvent, DeploymentId, DeploymentRecord, DeploymentState, Endpoint,
    ShiftPlan, StateStore,
};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::machine::{Action, DeploymentMachine};
use crate::registry::RevisionRegistry;

/// Tunables for the orchestrator and its driver tasks.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Interval between driver ticks.
    pub tick_interval: Duration,
    /// Whether an Unhealthy verdict with alarms clear forces rollback.
    pub rollback_on_unhealthy: bool,
    /// Consecutive metric-source failures tolerated before Failed.
    pub max_source_failures: u32,
    /// Revert attempts before a rollback is declared Failed.
    pub max_rollback_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            rollback_on_unhealthy: true,
            max_source_failures: 5,
            max_rollback_attempts: 3,
        }
    }
}

/// Parameters for starting a new deployment.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub id: DeploymentId,
    pub source_revision: String,
    pub target_revision: String,
    pub shift_plan: ShiftPlan,
    pub termination_wait_secs: u64,
    /// Alarm rules gating the deployment; `None` uses the stock
    /// blue/green set for both revisions.
    pub rules: Option<Vec<AlarmRule>>,
}

/// Per-deployment driver task state.
struct DriverSlot {
    handle: JoinHandle<()>,
    /// Shutdown signal: stop driving, leave the record for resume.
    shutdown_tx: watch::Sender<bool>,
    /// Cancel signal: roll back at the next tick boundary.
    cancel_tx: watch::Sender<bool>,
}

/// Coordinates blue/green deployments: one driver task per active
/// deployment, shared router/health/gate collaborators.
pub struct Orchestrator {
    state: StateStore,
    router: Arc<TrafficRouter>,
    health: Arc<HealthMonitor>,
    source: Arc<dyn MetricSource>,
    registry: Arc<dyn RevisionRegistry>,
    config: OrchestratorConfig,
    events_tx: broadcast::Sender<DeploymentEvent>,
    /// Active drivers: deployment_id → slot.
    drivers: Arc<RwLock<HashMap<DeploymentId, DriverSlot>>>,
}

impl Orchestrator {
    pub fn new(
        state: StateStore,
        router: Arc<TrafficRouter>,
        health: Arc<HealthMonitor>,
        source: Arc<dyn MetricSource>,
        registry: Arc<dyn RevisionRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            state,
            router,
            health,
            source,
            registry,
            config,
            events_tx,
            drivers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to the deployment event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.events_tx.subscribe()
    }

    /// Start a deployment: validate preconditions, route the target to the
    /// test endpoint, and spawn the driver task.
    pub async fn start(&self, req: DeploymentRequest) -> OrchestratorResult<DeploymentRecord> {
        for id in [&req.source_revision, &req.target_revision] {
            if self.registry.get(id)?.is_none() {
                return Err(OrchestratorError::RevisionNotFound(id.clone()));
            }
        }
        if self.state.get_deployment(&req.id)?.is_some() {
            return Err(OrchestratorError::PreconditionFailed(format!(
                "deployment {} already exists",
                req.id
            )));
        }
        if let Some(active) = self.state.active_deployment()? {
            return Err(OrchestratorError::PreconditionFailed(format!(
                "deployment {} is still active",
                active.id
            )));
        }

        let now = epoch_secs();
        let rules = req
            .rules
            .unwrap_or_else(|| default_rules(&req.source_revision, &req.target_revision));
        let record = DeploymentRecord {
            id: req.id.clone(),
            source_revision: req.source_revision,
            target_revision: req.target_revision,
            state: DeploymentState::Pending,
            shift_plan: req.shift_plan,
            alarm_rules: rules,
            termination_wait_secs: req.termination_wait_secs,
            baking_since: None,
            reason: None,
            started_at: now,
            updated_at: now,
        };

        let mut machine = DeploymentMachine::new(record, self.config.rollback_on_unhealthy);
        let action = machine.start(now);
        debug_assert_eq!(action, Action::RegisterTest);
        self.router
            .set_weight(Endpoint::Test, &machine.record().target_revision, 100)
            .await?;
        self.persist_and_emit(&machine, DeploymentState::Pending, now)?;

        let record = machine.record().clone();
        self.spawn_driver(machine).await;
        info!(deployment = %record.id, "deployment orchestration started");
        Ok(record)
    }

    /// Request cancellation of a deployment, honored at its next tick
    /// boundary. Idempotent: canceling a finished deployment is a no-op
    /// that reports the current state.
    pub async fn cancel(&self, deployment_id: &str) -> OrchestratorResult<DeploymentState> {
        let record = self
            .state
            .get_deployment(deployment_id)?
            .ok_or_else(|| OrchestratorError::DeploymentNotFound(deployment_id.to_string()))?;
        if record.state.is_terminal() {
            return Ok(record.state);
        }

        let drivers = self.drivers.read().await;
        match drivers.get(deployment_id) {
            Some(slot) => {
                let _ = slot.cancel_tx.send(true);
                info!(deployment = %deployment_id, "cancellation requested");
            }
            None => {
                warn!(deployment = %deployment_id, "cancel requested but no driver is running");
            }
        }
        Ok(record.state)
    }

    /// Respawn drivers for every non-terminal deployment record. Called
    /// once after process start so an interrupted deployment resumes from
    /// its last durable state.
    pub async fn resume_all(&self) -> OrchestratorResult<Vec<DeploymentId>> {
        let mut resumed = Vec::new();
        for record in self.state.list_deployments()? {
            if record.state.is_terminal() || self.is_driving(&record.id).await {
                continue;
            }
            let id = record.id.clone();
            let mut machine = DeploymentMachine::new(record, self.config.rollback_on_unhealthy);

            // A Pending record means the process died mid-start; finish the
            // start sequence before driving.
            if machine.state() == DeploymentState::Pending {
                let now = epoch_secs();
                machine.start(now);
                self.router
                    .set_weight(Endpoint::Test, &machine.record().target_revision, 100)
                    .await?;
                self.persist_and_emit(&machine, DeploymentState::Pending, now)?;
            }

            info!(deployment = %id, state = %machine.state(), "resuming deployment");
            self.spawn_driver(machine).await;
            resumed.push(id);
        }
        Ok(resumed)
    }

    /// Stop all driver tasks (for graceful shutdown). Records stay in the
    /// store and resume on the next start.
    pub async fn shutdown(&self) {
        // Drop the lock before awaiting handles: each driver takes it to
        // deregister itself as it exits.
        let slots: Vec<(DeploymentId, DriverSlot)> = {
            let mut drivers = self.drivers.write().await;
            drivers.drain().collect()
        };
        for (id, slot) in slots {
            let _ = slot.shutdown_tx.send(true);
            if tokio::time::timeout(Duration::from_secs(5), slot.handle)
                .await
                .is_err()
            {
                warn!(deployment = %id, "driver did not stop in time");
            } else {
                debug!(deployment = %id, "driver stopped");
            }
        }
        info!("all deployment drivers stopped");
    }

    /// Whether a driver task is running for this deployment.
    pub async fn is_driving(&self, deployment_id: &str) -> bool {
        let drivers = self.drivers.read().await;
        drivers.contains_key(deployment_id)
    }

    /// Deployment IDs with active drivers.
    pub async fn driving(&self) -> Vec<DeploymentId> {
        let drivers = self.drivers.read().await;
        drivers.keys().cloned().collect()
    }

    async fn spawn_driver(&self, machine: DeploymentMachine) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let deployment_id = machine.record().id.clone();

        let ctx = DriverContext {
            state: self.state.clone(),
            router: self.router.clone(),
            health: self.health.clone(),
            source: self.source.clone(),
            config: self.config.clone(),
            events_tx: self.events_tx.clone(),
            drivers: self.drivers.clone(),
        };
        let id = deployment_id.clone();
        let handle = tokio::spawn(async move {
            run_driver_loop(machine, ctx, cancel_rx, shutdown_rx).await;
        });

        let mut drivers = self.drivers.write().await;
        if let Some(old) = drivers.insert(
            deployment_id,
            DriverSlot {
                handle,
                shutdown_tx,
                cancel_tx,
            },
        ) {
            // Replace a stale driver if one was somehow still running.
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        debug!(deployment = %id, "driver spawned");
    }

    fn persist_and_emit(
        &self,
        machine: &DeploymentMachine,
        from: DeploymentState,
        now: u64,
    ) -> OrchestratorResult<()> {
        self.state.put_deployment(machine.record())?;
        emit_transition(&self.state, &self.events_tx, machine.record(), from, now)?;
        Ok(())
    }
}

/// Shared collaborators handed to a driver task.
struct DriverContext {
    state: StateStore,
    router: Arc<TrafficRouter>,
    health: Arc<HealthMonitor>,
    source: Arc<dyn MetricSource>,
    config: OrchestratorConfig,
    events_tx: broadcast::Sender<DeploymentEvent>,
    drivers: Arc<RwLock<HashMap<DeploymentId, DriverSlot>>>,
}

/// The tick loop for a single deployment.
async fn run_driver_loop(
    mut machine: DeploymentMachine,
    ctx: DriverContext,
    cancel_rx: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let deployment_id = machine.record().id.clone();
    let gate = AlarmGate::new(machine.record().alarm_rules.clone());
    let mut source_failures = 0u32;
    let mut rollback_attempts = 0u32;
    let mut interval = ctx.config.tick_interval;

    debug!(deployment = %deployment_id, "driver loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {
                debug!(deployment = %deployment_id, "driver shutting down");
                break;
            }
        }

        let now = epoch_secs();
        let mut from = machine.state();

        // Cancellation is honored at the tick boundary.
        let action = if *cancel_rx.borrow() && !machine.state().is_terminal() {
            machine.cancel(now)
        } else {
            match gate.evaluate(ctx.source.as_ref(), now) {
                Ok(report) => {
                    source_failures = 0;
                    interval = ctx.config.tick_interval;

                    let breach = report.breaches.first().map(|b| b.rule.clone());
                    let verdict = ctx.health.verdict(&machine.record().target_revision).await;
                    let weight = ctx
                        .router
                        .snapshot(Endpoint::Production)
                        .await
                        .weight_of(&machine.record().target_revision);
                    machine.tick(now, breach.as_deref(), verdict, weight)
                }
                Err(e) => {
                    // Transient: hold and retry with backoff, never a breach.
                    source_failures += 1;
                    if source_failures >= ctx.config.max_source_failures {
                        machine.fail(
                            now,
                            &format!(
                                "metric source unavailable after {source_failures} attempts: {e}"
                            ),
                        );
                        Action::Hold
                    } else {
                        warn!(
                            deployment = %deployment_id,
                            error = %e,
                            attempt = source_failures,
                            "metric source unavailable, holding"
                        );
                        interval = backoff(ctx.config.tick_interval, source_failures);
                        continue;
                    }
                }
            }
        };

        // The tick itself may have transitioned (e.g. into RollingBack);
        // surface that before executing the routing action.
        from = flush_transition(&ctx, &machine, from, now);

        match action {
            Action::Hold => {}
            Action::RegisterTest => {
                // Only reachable through start()/resume_all(); nothing to do
                // here.
            }
            Action::ShiftProduction { weight } => {
                let target = machine.record().target_revision.clone();
                match ctx
                    .router
                    .set_weight(Endpoint::Production, &target, weight)
                    .await
                {
                    Ok(()) => {
                        // The shift timestamp schedules the next step; keep
                        // it durable so a restart honors the plan interval.
                        if let Err(e) = ctx.state.put_deployment(machine.record()) {
                            error!(
                                deployment = %deployment_id,
                                error = %e,
                                "failed to persist deployment record"
                            );
                        }
                    }
                    Err(e) => machine.fail(now, &format!("traffic shift failed: {e}")),
                }
            }
            Action::Finalize => {
                if let Err(e) = ctx.router.clear(Endpoint::Test).await {
                    // The deployment already committed; draining the test
                    // endpoint can be redone by hand.
                    error!(deployment = %deployment_id, error = %e, "failed to drain test endpoint");
                }
            }
            Action::Revert => {
                rollback_attempts += 1;
                match revert(&ctx.router, machine.record()).await {
                    Ok(()) => {
                        machine.confirm_reverted(now);
                        rollback_attempts = 0;
                        interval = ctx.config.tick_interval;
                    }
                    Err(e) if rollback_attempts >= ctx.config.max_rollback_attempts => {
                        let err = OrchestratorError::RollbackFailed {
                            attempts: rollback_attempts,
                            reason: e.to_string(),
                        };
                        machine.fail(now, &err.to_string());
                    }
                    Err(e) => {
                        warn!(
                            deployment = %deployment_id,
                            error = %e,
                            attempt = rollback_attempts,
                            "revert failed, will retry"
                        );
                        interval = backoff(ctx.config.tick_interval, rollback_attempts);
                    }
                }
            }
        }

        flush_transition(&ctx, &machine, from, now);

        if machine.state().is_terminal() {
            info!(deployment = %deployment_id, state = %machine.state(), "driver finished");
            break;
        }
    }

    let mut drivers = ctx.drivers.write().await;
    drivers.remove(&deployment_id);
}

/// Persist the record and emit an event if the state moved. Returns the
/// new "from" state for subsequent transitions within the same tick.
fn flush_transition(
    ctx: &DriverContext,
    machine: &DeploymentMachine,
    from: DeploymentState,
    now: u64,
) -> DeploymentState {
    let current = machine.state();
    if current == from {
        return from;
    }
    if let Err(e) = ctx.state.put_deployment(machine.record()) {
        error!(deployment = %machine.record().id, error = %e, "failed to persist deployment record");
    }
    if let Err(e) = emit_transition(&ctx.state, &ctx.events_tx, machine.record(), from, now) {
        error!(deployment = %machine.record().id, error = %e, "failed to append deployment event");
    }
    current
}

/// Append a transition to the durable event log and broadcast it.
fn emit_transition(
    state: &StateStore,
    events_tx: &broadcast::Sender<DeploymentEvent>,
    record: &DeploymentRecord,
    from: DeploymentState,
    now: u64,
) -> OrchestratorResult<()> {
    let event = state.append_event(&record.id, from, record.state, now, record.reason.clone())?;
    // Nobody listening is fine.
    let _ = events_tx.send(event);
    Ok(())
}

/// Cut production back to the source revision and drain the test endpoint.
async fn revert(
    router: &TrafficRouter,
    record: &DeploymentRecord,
) -> Result<(), switchyard_router::RouterError> {
    router
        .cutover(Endpoint::Production, &record.source_revision)
        .await?;
    router.clear(Endpoint::Test).await?;
    Ok(())
}

/// Exponential backoff on the tick interval, capped at 8x.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(3);
    base.saturating_mul(factor)
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
