//! Scenario engine: the stepper side of the scenario server.
//!
//! A scenario is advanced one step at a time. Each step reports how long until
//! the next one is due, so there is no global tick: a quiet scenario costs
//! nothing between events.

pub mod fleet;
pub mod scenario;
pub mod store;

pub use scenario::{
    ScenarioBackend, ScenarioError, ScenarioId, ScenarioStatus, ScenarioSummary, StepOutcome,
};
pub use store::ScenarioStore;
