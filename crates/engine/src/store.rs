//! In-memory scenario store backed by the fleet simulation.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use crate::fleet::Fleet;
use crate::scenario::{
    ScenarioBackend, ScenarioError, ScenarioId, ScenarioStatus, ScenarioSummary, StepOutcome,
};

struct ScenarioRecord {
    status: ScenarioStatus,
    vehicles: usize,
    customers: usize,
    speed: Option<f64>,
    fleet: Option<Fleet>,
    failure: Option<String>,
}

/// Serialized form of a scenario, as handed to clients.
#[derive(Serialize)]
struct ScenarioView<'a> {
    id: ScenarioId,
    status: ScenarioStatus,
    speed: Option<f64>,
    vehicle_count: usize,
    customer_count: usize,
    clock: f64,
    vehicles: &'a [crate::fleet::Vehicle],
    customers: &'a [crate::fleet::Customer],
    failure: Option<&'a str>,
}

/// All scenarios known to the process. Thread-safe, lock-sharded by id.
///
/// Each call holds a shard lock only for the duration of one synchronous
/// operation, so scenario tasks on different ids rarely contend.
pub struct ScenarioStore {
    scenarios: DashMap<ScenarioId, ScenarioRecord>,
    next_id: AtomicU64,
    base_seed: u64,
}

impl ScenarioStore {
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Fleets are generated from `base_seed ^ id`, so the same seed and
    /// creation order reproduce the same scenarios.
    pub fn with_seed(base_seed: u64) -> Self {
        Self {
            scenarios: DashMap::new(),
            next_id: AtomicU64::new(1),
            base_seed,
        }
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

impl Default for ScenarioStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioBackend for ScenarioStore {
    fn create_scenario(
        &self,
        vehicles: usize,
        customers: usize,
    ) -> Result<ScenarioId, ScenarioError> {
        let id = ScenarioId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.scenarios.insert(
            id,
            ScenarioRecord {
                status: ScenarioStatus::Created,
                vehicles,
                customers,
                speed: None,
                fleet: None,
                failure: None,
            },
        );
        tracing::debug!("Created scenario {} ({} vehicles, {} customers)", id, vehicles, customers);
        Ok(id)
    }

    fn initialize_scenario(&self, id: ScenarioId) -> Result<(), ScenarioError> {
        let mut record = self
            .scenarios
            .get_mut(&id)
            .ok_or(ScenarioError::UnknownScenario(id))?;
        // A cancelled run leaves the scenario RUNNING; rebuilding is how it
        // gets restarted. Keeping two loops off one id is the caller's job.
        let fleet = Fleet::generate(record.vehicles, record.customers, self.base_seed ^ id.0);
        record.fleet = Some(fleet);
        record.status = ScenarioStatus::Created;
        record.speed = None;
        record.failure = None;
        Ok(())
    }

    fn start_scenario_run(&self, id: ScenarioId, speed: f64) -> Result<(), ScenarioError> {
        if !speed.is_finite() || speed < 0.0 {
            return Err(ScenarioError::InvalidArgument(format!(
                "speed must be a finite number >= 0, got {speed}"
            )));
        }
        let mut record = self
            .scenarios
            .get_mut(&id)
            .ok_or(ScenarioError::UnknownScenario(id))?;
        if record.status != ScenarioStatus::Created {
            return Err(ScenarioError::InvalidState {
                id,
                status: record.status,
                action: "start",
            });
        }
        if record.fleet.is_none() {
            return Err(ScenarioError::NotInitialized(id));
        }
        record.status = ScenarioStatus::Running;
        record.speed = Some(speed);
        Ok(())
    }

    fn step_scenario(&self, id: ScenarioId) -> Result<StepOutcome, ScenarioError> {
        let mut record = self
            .scenarios
            .get_mut(&id)
            .ok_or(ScenarioError::UnknownScenario(id))?;
        let record = &mut *record;
        if record.status != ScenarioStatus::Running {
            return Err(ScenarioError::InvalidState {
                id,
                status: record.status,
                action: "step",
            });
        }
        let fleet = record
            .fleet
            .as_mut()
            .ok_or(ScenarioError::NotInitialized(id))?;

        let step = fleet.advance();
        if step.finished {
            tracing::debug!(
                "Scenario {} finished at t={:.2}: {}/{} delivered",
                id,
                fleet.clock,
                fleet.delivered(),
                fleet.customers.len()
            );
            record.status = ScenarioStatus::Completed;
        }

        Ok(StepOutcome {
            wait: step.wait,
            update_required: step.changed,
            remaining_times: step.remaining_times,
        })
    }

    fn scenario_data(&self, id: ScenarioId) -> Result<serde_json::Value, ScenarioError> {
        let record = self
            .scenarios
            .get(&id)
            .ok_or(ScenarioError::UnknownScenario(id))?;
        let (clock, vehicles, customers) = match &record.fleet {
            Some(fleet) => (
                fleet.clock,
                fleet.vehicles.as_slice(),
                fleet.customers.as_slice(),
            ),
            None => (0.0, &[][..], &[][..]),
        };
        let view = ScenarioView {
            id,
            status: record.status,
            speed: record.speed,
            vehicle_count: record.vehicles,
            customer_count: record.customers,
            clock,
            vehicles,
            customers,
            failure: record.failure.as_deref(),
        };
        serde_json::to_value(&view).map_err(|e| ScenarioError::Corrupt {
            id,
            reason: e.to_string(),
        })
    }

    fn scenario_status(&self, id: ScenarioId) -> Result<ScenarioStatus, ScenarioError> {
        self.scenarios
            .get(&id)
            .map(|record| record.status)
            .ok_or(ScenarioError::UnknownScenario(id))
    }

    fn fail_scenario(&self, id: ScenarioId, reason: &str) -> Result<(), ScenarioError> {
        let mut record = self
            .scenarios
            .get_mut(&id)
            .ok_or(ScenarioError::UnknownScenario(id))?;
        record.status = ScenarioStatus::Failed;
        record.failure = Some(reason.to_string());
        Ok(())
    }

    fn list_scenarios(&self) -> Vec<ScenarioSummary> {
        let mut list: Vec<ScenarioSummary> = self
            .scenarios
            .iter()
            .map(|entry| ScenarioSummary {
                id: *entry.key(),
                status: entry.status,
                vehicles: entry.vehicles,
                customers: entry.customers,
            })
            .collect();
        list.sort_by_key(|s| s.id);
        list
    }
}
