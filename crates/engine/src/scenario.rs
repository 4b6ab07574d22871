//! Scenario vocabulary shared by the store and the broadcast loop.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque scenario handle, allocated by the backend on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioId(pub u64);

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a scenario.
///
/// `Created -> Running -> Completed` is the normal path. `Failed` is entered
/// only when a run is aborted by a stepper error; re-initializing clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// The result of advancing a scenario by one step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutcome {
    /// Abstract time units until the next step is due. Never negative.
    pub wait: f64,
    /// Whether this step changed anything clients should see.
    pub update_required: bool,
    /// Remaining-time values discovered during this step, keyed by entity id.
    pub remaining_times: HashMap<String, f64>,
}

impl StepOutcome {
    pub fn new(wait: f64, update_required: bool) -> Self {
        Self {
            wait,
            update_required,
            remaining_times: HashMap::new(),
        }
    }

    pub fn with_remaining(mut self, entity: impl Into<String>, remaining: f64) -> Self {
        self.remaining_times.insert(entity.into(), remaining);
        self
    }
}

/// One line of a scenario listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub id: ScenarioId,
    pub status: ScenarioStatus,
    pub vehicles: usize,
    pub customers: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScenarioError {
    #[error("unknown scenario {0}")]
    UnknownScenario(ScenarioId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("scenario {id} is {status}, cannot {action}")]
    InvalidState {
        id: ScenarioId,
        status: ScenarioStatus,
        action: &'static str,
    },

    #[error("scenario {0} has not been initialized")]
    NotInitialized(ScenarioId),

    #[error("scenario {id} is corrupt: {reason}")]
    Corrupt { id: ScenarioId, reason: String },
}

/// Everything the broadcast loop and session layer need from a scenario
/// implementation.
///
/// All methods are synchronous and bounded: they never wait on I/O, so the
/// loop can call them from an async task without yielding. Implementations
/// own their own synchronization (`&self` everywhere).
pub trait ScenarioBackend: Send + Sync + 'static {
    /// Allocate a new scenario with `vehicles` and `customers` entities.
    fn create_scenario(&self, vehicles: usize, customers: usize)
    -> Result<ScenarioId, ScenarioError>;

    /// Build (or rebuild) the scenario's initial state. Leaves it `Created`.
    fn initialize_scenario(&self, id: ScenarioId) -> Result<(), ScenarioError>;

    /// Start the scenario clock. `Created -> Running`.
    fn start_scenario_run(&self, id: ScenarioId, speed: f64) -> Result<(), ScenarioError>;

    /// Advance one step.
    fn step_scenario(&self, id: ScenarioId) -> Result<StepOutcome, ScenarioError>;

    /// Full, serializable view of the scenario.
    fn scenario_data(&self, id: ScenarioId) -> Result<serde_json::Value, ScenarioError>;

    fn scenario_status(&self, id: ScenarioId) -> Result<ScenarioStatus, ScenarioError>;

    /// Mark a scenario as failed after its run was aborted.
    fn fail_scenario(&self, id: ScenarioId, reason: &str) -> Result<(), ScenarioError>;

    fn list_scenarios(&self) -> Vec<ScenarioSummary>;
}
