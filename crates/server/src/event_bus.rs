//! Scenario event bus for loop-to-client distribution.
//!
//! Every scenario loop publishes its snapshots to one shared
//! `tokio::sync::broadcast` channel. Each websocket connection subscribes and
//! forwards every event to its client, so all clients see all scenarios.

use std::sync::Arc;

use scenario_engine::{ScenarioId, ScenarioStatus};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::remaining::RemainingTimes;

/// Recommended capacity for the broadcast channel.
/// A client that falls this many events behind skips ahead to the newest.
pub const BUS_CAPACITY: usize = 256;

pub type EventBus = broadcast::Sender<ScenarioEvent>;

/// Consolidated view of a scenario, sent whenever a step asks for an update.
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioSnapshot {
    pub scenario_id: ScenarioId,
    pub data: serde_json::Value,
    pub status: ScenarioStatus,
    pub start_remaining_time: RemainingTimes,
}

/// How a scenario run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Something every connected client should hear about.
///
/// Snapshots are wrapped in `Arc` so cloning per subscriber is just a
/// refcount bump.
#[derive(Clone, Debug)]
pub enum ScenarioEvent {
    Updated(Arc<ScenarioSnapshot>),
    Ended {
        scenario_id: ScenarioId,
        outcome: RunOutcome,
        reason: Option<Arc<str>>,
    },
}

impl ScenarioEvent {
    pub fn scenario_id(&self) -> ScenarioId {
        match self {
            Self::Updated(snapshot) => snapshot.scenario_id,
            Self::Ended { scenario_id, .. } => *scenario_id,
        }
    }
}

pub fn channel(capacity: usize) -> EventBus {
    let (tx, _) = broadcast::channel(capacity.max(1));
    tx
}

/// Fire-and-forget publication. Returns the number of subscribers reached.
pub fn publish(bus: &EventBus, event: ScenarioEvent) -> usize {
    // No subscribers is not an error: the run goes on without an audience.
    bus.send(event).unwrap_or(0)
}
