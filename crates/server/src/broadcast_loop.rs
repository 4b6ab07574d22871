//! The scenario broadcast loop.
//!
//! One loop drives one scenario run: step the backend, fold the step's
//! remaining times into the run's accumulated map, publish a snapshot when the
//! step asks for one, then wait out `wait * speed` time units. The wait is the
//! only suspension point and races a [`CancellationToken`], so a stopped run
//! never steps or broadcasts again.

use std::sync::Arc;
use std::time::Duration;

use scenario_engine::{ScenarioBackend, ScenarioError, ScenarioId, ScenarioStatus, StepOutcome};
use tokio_util::sync::CancellationToken;

use crate::event_bus::{self, EventBus, RunOutcome, ScenarioEvent, ScenarioSnapshot};
use crate::metrics::Metrics;
use crate::remaining::RemainingTimes;

/// Summary of a run that ended without error.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub scenario_id: ScenarioId,
    /// `Completed` or `Cancelled`; failures come back as [`LoopError`].
    pub outcome: RunOutcome,
    pub steps: usize,
    pub broadcasts: usize,
    /// Sum of `wait * speed` over every step, in abstract time units.
    pub simulated_wait: f64,
    pub remaining: RemainingTimes,
}

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("scenario {id} failed after {steps} steps: {source}")]
    Fatal {
        id: ScenarioId,
        steps: usize,
        #[source]
        source: ScenarioError,
    },
}

/// `wait * speed` abstract units, converted to wall time.
///
/// Saturates instead of panicking when the product does not fit a `Duration`.
pub fn effective_wait(wait: f64, speed: f64, time_unit: Duration) -> Duration {
    let secs = wait * speed * time_unit.as_secs_f64();
    if secs <= 0.0 || secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Suspend for `wait`. A zero wait still yields once so a fast-forward run
/// cannot starve other tasks on the same worker.
async fn pause(wait: Duration) {
    if wait.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(wait).await;
    }
}

/// Runs scenario loops against one backend and one event bus.
pub struct BroadcastLoop {
    backend: Arc<dyn ScenarioBackend>,
    bus: EventBus,
    metrics: Arc<Metrics>,
    time_unit: Duration,
}

impl BroadcastLoop {
    pub fn new(
        backend: Arc<dyn ScenarioBackend>,
        bus: EventBus,
        metrics: Arc<Metrics>,
        time_unit: Duration,
    ) -> Self {
        Self {
            backend,
            bus,
            metrics,
            time_unit,
        }
    }

    pub fn backend(&self) -> &Arc<dyn ScenarioBackend> {
        &self.backend
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Drive `id` until the backend reports `Completed` or `cancel` fires.
    ///
    /// The scenario must already be created, initialized and started. On a
    /// backend error nothing further is published, the scenario is marked
    /// failed, and the error is returned.
    pub async fn run(
        &self,
        id: ScenarioId,
        speed: f64,
        cancel: &CancellationToken,
    ) -> Result<RunReport, LoopError> {
        let mut report = RunReport {
            scenario_id: id,
            outcome: RunOutcome::Completed,
            steps: 0,
            broadcasts: 0,
            simulated_wait: 0.0,
            remaining: RemainingTimes::new(),
        };

        let mut status = self
            .backend
            .scenario_status(id)
            .map_err(|e| self.fail(id, report.steps, e))?;

        while status != ScenarioStatus::Completed {
            if cancel.is_cancelled() {
                report.outcome = RunOutcome::Cancelled;
                return Ok(report);
            }

            let step = self
                .backend
                .step_scenario(id)
                .and_then(|step| validate(id, step))
                .map_err(|e| self.fail(id, report.steps + 1, e))?;
            report.steps += 1;
            self.metrics.record_step();

            report.remaining.merge(step.remaining_times);

            if step.update_required {
                let snapshot = self
                    .snapshot(id, &report.remaining)
                    .map_err(|e| self.fail(id, report.steps, e))?;
                let reached = event_bus::publish(&self.bus, ScenarioEvent::Updated(Arc::new(snapshot)));
                report.broadcasts += 1;
                self.metrics.record_broadcast();
                tracing::debug!(
                    "Scenario {}: step {} broadcast to {} subscribers ({} remaining-time entries)",
                    id,
                    report.steps,
                    reached,
                    report.remaining.len()
                );
            }

            let wait = effective_wait(step.wait, speed, self.time_unit);
            report.simulated_wait += step.wait * speed;
            tracing::debug!(
                "Scenario {}: waiting {}*{}={} units ({:?})",
                id,
                step.wait,
                speed,
                step.wait * speed,
                wait
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.outcome = RunOutcome::Cancelled;
                    return Ok(report);
                }
                _ = pause(wait) => {}
            }

            status = self
                .backend
                .scenario_status(id)
                .map_err(|e| self.fail(id, report.steps, e))?;
        }

        Ok(report)
    }

    fn snapshot(
        &self,
        id: ScenarioId,
        remaining: &RemainingTimes,
    ) -> Result<ScenarioSnapshot, ScenarioError> {
        Ok(ScenarioSnapshot {
            scenario_id: id,
            data: self.backend.scenario_data(id)?,
            status: self.backend.scenario_status(id)?,
            start_remaining_time: remaining.clone(),
        })
    }

    /// Mark the scenario failed and build the error for the caller.
    fn fail(&self, id: ScenarioId, steps: usize, source: ScenarioError) -> LoopError {
        if let Err(e) = self.backend.fail_scenario(id, &source.to_string()) {
            tracing::warn!("Could not mark scenario {} as failed: {}", id, e);
        }
        LoopError::Fatal { id, steps, source }
    }
}

/// Reject steps the loop cannot honour.
fn validate(id: ScenarioId, step: StepOutcome) -> Result<StepOutcome, ScenarioError> {
    if !step.wait.is_finite() || step.wait < 0.0 {
        return Err(ScenarioError::Corrupt {
            id,
            reason: format!("step returned wait of {}", step.wait),
        });
    }
    Ok(step)
}
