//! Scenario sessions: which scenarios have a live loop, and who is listening.
//!
//! Every start request goes through here. The registry guarantees at most one
//! broadcast loop per scenario id, owns the cancellation token of every run,
//! and tracks bus subscribers so runs can be cancelled once nobody is left to
//! watch them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use scenario_engine::{ScenarioId, ScenarioSummary};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast_loop::{BroadcastLoop, LoopError, RunReport};
use crate::error::SessionError;
use crate::event_bus::{self, RunOutcome, ScenarioEvent};
use crate::metrics::{Metrics, MetricsSnapshot};

/// Default upper bound on vehicles and on customers in one scenario.
pub const MAX_ENTITIES: usize = 10_000;

/// Parameters of a fresh scenario, as sent by a client.
///
/// Counts arrive signed so negative values can be rejected with a proper
/// error instead of a decode failure.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartRequest {
    #[serde(alias = "vhs_num")]
    pub vehicles: i64,
    #[serde(alias = "cms_num")]
    pub customers: i64,
    pub speed: f64,
}

/// A run that was accepted and spawned.
#[derive(Debug)]
pub struct RunHandle {
    pub scenario_id: ScenarioId,
    pub task: JoinHandle<()>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRunInfo {
    pub scenario_id: ScenarioId,
    pub speed: f64,
}

struct ActiveRun {
    run_id: u64,
    speed: f64,
    cancel: CancellationToken,
}

/// Registry of live scenario runs.
///
/// Uses `std::sync::RwLock` because every operation is brief (no awaits while
/// the lock is held).
pub struct ScenarioSessions {
    runner: Arc<BroadcastLoop>,
    metrics: Arc<Metrics>,
    active: RwLock<HashMap<ScenarioId, ActiveRun>>,
    next_run_id: AtomicU64,
    cancel_when_idle: bool,
    max_entities: usize,
    /// Parent of every run token; cancelled once on shutdown.
    shutdown: CancellationToken,
}

impl ScenarioSessions {
    pub fn new(runner: Arc<BroadcastLoop>, metrics: Arc<Metrics>, cancel_when_idle: bool) -> Self {
        Self {
            runner,
            metrics,
            active: RwLock::new(HashMap::new()),
            next_run_id: AtomicU64::new(1),
            cancel_when_idle,
            max_entities: MAX_ENTITIES,
            shutdown: CancellationToken::new(),
        }
    }

    /// Reject start requests with more than `max` vehicles or customers.
    pub fn with_max_entities(mut self, max: usize) -> Self {
        self.max_entities = max;
        self
    }

    /// Create, initialize and start a fresh scenario, then spawn its loop.
    pub fn start(self: &Arc<Self>, request: &StartRequest) -> Result<RunHandle, SessionError> {
        let vehicles = count("vehicles", request.vehicles, self.max_entities)?;
        let customers = count("customers", request.customers, self.max_entities)?;
        check_speed(request.speed)?;

        let id = self
            .runner
            .backend()
            .create_scenario(vehicles, customers)?;
        tracing::info!(
            "Scenario {} created: {} vehicles, {} customers, speed {}",
            id,
            vehicles,
            customers,
            request.speed
        );
        self.launch(id, request.speed)
    }

    /// Rebuild an existing scenario and run it again from the start.
    pub fn restart(self: &Arc<Self>, id: ScenarioId, speed: f64) -> Result<RunHandle, SessionError> {
        check_speed(speed)?;
        self.launch(id, speed)
    }

    fn launch(self: &Arc<Self>, id: ScenarioId, speed: f64) -> Result<RunHandle, SessionError> {
        let cancel = self.shutdown.child_token();
        let reservation = self.reserve(id, speed, cancel.clone())?;

        // Any early return or panic from here on drops the reservation.
        let backend = self.runner.backend();
        backend
            .initialize_scenario(id)
            .and_then(|()| backend.start_scenario_run(id, speed))?;

        self.metrics.run_started();
        tracing::info!("Scenario {} run started (speed {})", id, speed);

        let task = tokio::spawn(async move {
            let sessions = &reservation.sessions;
            let result = sessions.runner.run(id, speed, &cancel).await;
            sessions.finish(id, reservation.run_id, result);
        });

        Ok(RunHandle {
            scenario_id: id,
            task,
        })
    }

    /// Claim `id` for a new run, or fail with `Conflict` if one is active.
    fn reserve(
        self: &Arc<Self>,
        id: ScenarioId,
        speed: f64,
        cancel: CancellationToken,
    ) -> Result<Reservation, SessionError> {
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let mut active = self.active.write().expect("session registry poisoned");
        if active.contains_key(&id) {
            return Err(SessionError::Conflict(id));
        }
        active.insert(
            id,
            ActiveRun {
                run_id,
                speed,
                cancel,
            },
        );
        Ok(Reservation {
            sessions: Arc::clone(self),
            id,
            run_id,
        })
    }

    fn finish(&self, id: ScenarioId, run_id: u64, result: Result<RunReport, LoopError>) {
        self.release(id, run_id);

        let (outcome, reason) = match result {
            Ok(report) => {
                tracing::info!(
                    "Scenario {} run {:?} after {} steps, {} broadcasts",
                    id,
                    report.outcome,
                    report.steps,
                    report.broadcasts
                );
                (report.outcome, None)
            }
            Err(e) => {
                tracing::error!("{}", e);
                (RunOutcome::Failed, Some(Arc::from(e.to_string())))
            }
        };

        self.metrics.run_finished(outcome);
        event_bus::publish(
            self.runner.bus(),
            ScenarioEvent::Ended {
                scenario_id: id,
                outcome,
                reason,
            },
        );
    }

    /// Drop the registry entry, unless a newer run already replaced it.
    fn release(&self, id: ScenarioId, run_id: u64) {
        // Also runs from `Reservation::drop`, possibly while unwinding.
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.get(&id).is_some_and(|run| run.run_id == run_id) {
            active.remove(&id);
        }
    }

    /// Cancel the active run of `id`. The loop exits at its next wait.
    pub fn stop(&self, id: ScenarioId) -> Result<(), SessionError> {
        let active = self.active.read().expect("session registry poisoned");
        let run = active.get(&id).ok_or(SessionError::NotRunning(id))?;
        run.cancel.cancel();
        tracing::info!("Scenario {} stop requested", id);
        Ok(())
    }

    /// Cancel every active run. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = self.active.read().expect("session registry poisoned");
        for run in active.values() {
            run.cancel.cancel();
        }
        active.len()
    }

    /// Cancel everything, including runs started after this call.
    pub fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        self.active.read().expect("session registry poisoned").len()
    }

    pub fn is_active(&self, id: ScenarioId) -> bool {
        self.active
            .read()
            .expect("session registry poisoned")
            .contains_key(&id)
    }

    pub fn active_runs(&self) -> Vec<ActiveRunInfo> {
        let mut runs: Vec<ActiveRunInfo> = self
            .active
            .read()
            .expect("session registry poisoned")
            .iter()
            .map(|(id, run)| ActiveRunInfo {
                scenario_id: *id,
                speed: run.speed,
            })
            .collect();
        runs.sort_by_key(|r| r.scenario_id);
        runs
    }

    pub fn scenarios(&self) -> Vec<ScenarioSummary> {
        self.runner.backend().list_scenarios()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let active = self.active.read().expect("session registry poisoned").len();
        self.metrics.snapshot(active, self.scenarios().len())
    }

    /// Attach a new client to the event bus. The client is detached when the
    /// returned [`Subscription`] is dropped.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        self.metrics.client_connected();
        Subscription {
            events: Some(self.runner.bus().subscribe()),
            sessions: Arc::clone(self),
        }
    }

    /// Runs after a subscriber's receiver is gone. When it was the last one,
    /// every run is cancelled (unless idle runs are kept).
    fn detach(&self) {
        self.metrics.client_disconnected();

        if self.cancel_when_idle && self.runner.bus().receiver_count() == 0 {
            let cancelled = self.cancel_all();
            if cancelled > 0 {
                tracing::info!("Last client left, cancelled {} runs", cancelled);
            }
        }
    }
}

/// A registry entry owned by one run. Dropping it releases the entry, so a
/// failed or panicking launch never leaves the scenario locked.
struct Reservation {
    sessions: Arc<ScenarioSessions>,
    id: ScenarioId,
    run_id: u64,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.sessions.release(self.id, self.run_id);
    }
}

/// One client's receiver on the event bus.
pub struct Subscription {
    events: Option<broadcast::Receiver<ScenarioEvent>>,
    sessions: Arc<ScenarioSessions>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<ScenarioEvent, RecvError> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver must be gone before the idle check counts receivers.
        drop(self.events.take());
        self.sessions.detach();
    }
}

fn count(name: &str, value: i64, max: usize) -> Result<usize, SessionError> {
    match usize::try_from(value) {
        Ok(n) if n <= max => Ok(n),
        _ => Err(SessionError::InvalidArgument(format!(
            "{name} must be between 0 and {max}, got {value}"
        ))),
    }
}

fn check_speed(speed: f64) -> Result<(), SessionError> {
    if speed.is_finite() && speed >= 0.0 {
        Ok(())
    } else {
        Err(SessionError::InvalidArgument(format!(
            "speed must be a finite number >= 0, got {speed}"
        )))
    }
}
