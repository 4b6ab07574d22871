//! Scripted scenario backend: every scenario replays a fixed list of steps
//! and reports `Completed` once the list is exhausted.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scenario_engine::{
    ScenarioBackend, ScenarioError, ScenarioId, ScenarioStatus, ScenarioSummary, StepOutcome,
};
use scenario_server::broadcast_loop::BroadcastLoop;
use scenario_server::event_bus::{self, EventBus};
use scenario_server::metrics::Metrics;
use serde_json::json;

pub type Script = Vec<Result<StepOutcome, ScenarioError>>;

struct Scripted {
    status: ScenarioStatus,
    script: Script,
    cursor: usize,
    failure: Option<String>,
}

pub struct ScriptedBackend {
    template: Script,
    scenarios: Mutex<HashMap<ScenarioId, Scripted>>,
    next_id: AtomicU64,
    panic_on_init: AtomicBool,
}

impl ScriptedBackend {
    /// Every scenario created from here on replays `template`.
    pub fn new(template: Script) -> Self {
        Self {
            template,
            scenarios: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            panic_on_init: AtomicBool::new(false),
        }
    }

    /// The next `initialize_scenario` panics instead of returning.
    pub fn panic_on_next_init(&self) {
        self.panic_on_init.store(true, Ordering::SeqCst);
    }

    /// Create, initialize and start a scenario with its own script.
    pub fn running(&self, script: Script) -> ScenarioId {
        let id = self.create_scenario(0, 0).unwrap();
        self.scenarios.lock().unwrap().get_mut(&id).unwrap().script = script;
        self.start_scenario_run(id, 1.0).unwrap();
        id
    }

    /// Number of steps taken by `id` since its last initialization.
    pub fn steps_taken(&self, id: ScenarioId) -> usize {
        self.scenarios.lock().unwrap()[&id].cursor
    }

    pub fn failure(&self, id: ScenarioId) -> Option<String> {
        self.scenarios.lock().unwrap()[&id].failure.clone()
    }
}

impl ScenarioBackend for ScriptedBackend {
    fn create_scenario(
        &self,
        _vehicles: usize,
        _customers: usize,
    ) -> Result<ScenarioId, ScenarioError> {
        let id = ScenarioId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.scenarios.lock().unwrap().insert(
            id,
            Scripted {
                status: ScenarioStatus::Created,
                script: self.template.clone(),
                cursor: 0,
                failure: None,
            },
        );
        Ok(id)
    }

    fn initialize_scenario(&self, id: ScenarioId) -> Result<(), ScenarioError> {
        // Checked before locking so the panic does not poison the map.
        if self.panic_on_init.swap(false, Ordering::SeqCst) {
            panic!("scripted initialize failure for scenario {id}");
        }
        let mut scenarios = self.scenarios.lock().unwrap();
        let s = scenarios
            .get_mut(&id)
            .ok_or(ScenarioError::UnknownScenario(id))?;
        s.status = ScenarioStatus::Created;
        s.cursor = 0;
        s.failure = None;
        Ok(())
    }

    fn start_scenario_run(&self, id: ScenarioId, _speed: f64) -> Result<(), ScenarioError> {
        let mut scenarios = self.scenarios.lock().unwrap();
        let s = scenarios
            .get_mut(&id)
            .ok_or(ScenarioError::UnknownScenario(id))?;
        s.status = ScenarioStatus::Running;
        Ok(())
    }

    fn step_scenario(&self, id: ScenarioId) -> Result<StepOutcome, ScenarioError> {
        let mut scenarios = self.scenarios.lock().unwrap();
        let s = scenarios
            .get_mut(&id)
            .ok_or(ScenarioError::UnknownScenario(id))?;
        if s.status != ScenarioStatus::Running {
            return Err(ScenarioError::InvalidState {
                id,
                status: s.status,
                action: "step",
            });
        }
        let step = s.script.get(s.cursor).cloned().ok_or(ScenarioError::Corrupt {
            id,
            reason: "script exhausted".into(),
        })?;
        s.cursor += 1;
        if s.cursor == s.script.len() {
            s.status = ScenarioStatus::Completed;
        }
        step
    }

    fn scenario_data(&self, id: ScenarioId) -> Result<serde_json::Value, ScenarioError> {
        let scenarios = self.scenarios.lock().unwrap();
        let s = scenarios.get(&id).ok_or(ScenarioError::UnknownScenario(id))?;
        Ok(json!({ "id": id, "step": s.cursor }))
    }

    fn scenario_status(&self, id: ScenarioId) -> Result<ScenarioStatus, ScenarioError> {
        self.scenarios
            .lock()
            .unwrap()
            .get(&id)
            .map(|s| s.status)
            .ok_or(ScenarioError::UnknownScenario(id))
    }

    fn fail_scenario(&self, id: ScenarioId, reason: &str) -> Result<(), ScenarioError> {
        let mut scenarios = self.scenarios.lock().unwrap();
        let s = scenarios
            .get_mut(&id)
            .ok_or(ScenarioError::UnknownScenario(id))?;
        s.status = ScenarioStatus::Failed;
        s.failure = Some(reason.to_string());
        Ok(())
    }

    fn list_scenarios(&self) -> Vec<ScenarioSummary> {
        let mut list: Vec<ScenarioSummary> = self
            .scenarios
            .lock()
            .unwrap()
            .iter()
            .map(|(id, s)| ScenarioSummary {
                id: *id,
                status: s.status,
                vehicles: 0,
                customers: 0,
            })
            .collect();
        list.sort_by_key(|s| s.id);
        list
    }
}

pub const UNIT: Duration = Duration::from_secs(1);

/// A loop over `backend` with a fresh bus and one-second time units.
pub fn runner(backend: Arc<ScriptedBackend>) -> (Arc<BroadcastLoop>, EventBus, Arc<Metrics>) {
    runner_with_capacity(backend, event_bus::BUS_CAPACITY)
}

/// Like [`runner`], over a bus that holds only `capacity` events.
pub fn runner_with_capacity(
    backend: Arc<ScriptedBackend>,
    capacity: usize,
) -> (Arc<BroadcastLoop>, EventBus, Arc<Metrics>) {
    let bus = event_bus::channel(capacity);
    let metrics = Arc::new(Metrics::new());
    let runner = Arc::new(BroadcastLoop::new(
        backend,
        bus.clone(),
        Arc::clone(&metrics),
        UNIT,
    ));
    (runner, bus, metrics)
}

pub fn step(wait: f64, update: bool, remaining: &[(&str, f64)]) -> Result<StepOutcome, ScenarioError> {
    let mut outcome = StepOutcome::new(wait, update);
    for (entity, value) in remaining {
        outcome = outcome.with_remaining(*entity, *value);
    }
    Ok(outcome)
}
