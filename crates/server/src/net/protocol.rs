//! JSON wire messages.
//!
//! Every frame is `{"event": <name>, "data": <payload>}` in both directions.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::Message;
use scenario_engine::{ScenarioId, ScenarioSummary};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::event_bus::{RunOutcome, ScenarioEvent, ScenarioSnapshot};
use crate::sessions::{ActiveRunInfo, StartRequest};

/// Requests a client can make.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a fresh scenario and run it.
    StartScenario(StartRequest),
    /// Rebuild an existing scenario and run it again.
    RunScenario { scenario_id: ScenarioId, speed: f64 },
    StopScenario { scenario_id: ScenarioId },
    ListScenarios,
}

/// Everything the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to the requesting client only.
    ScenarioStarted { scenario_id: ScenarioId, speed: f64 },
    UpdateScenario(Arc<ScenarioSnapshot>),
    ScenarioEnded {
        scenario_id: ScenarioId,
        outcome: RunOutcome,
        reason: Option<Arc<str>>,
    },
    ScenarioStopping { scenario_id: ScenarioId },
    ScenarioList {
        scenarios: Vec<ScenarioSummary>,
        active: Vec<ActiveRunInfo>,
    },
    Error { kind: &'static str, message: String },
}

impl From<ScenarioEvent> for ServerMessage {
    fn from(event: ScenarioEvent) -> Self {
        match event {
            ScenarioEvent::Updated(snapshot) => Self::UpdateScenario(snapshot),
            ScenarioEvent::Ended {
                scenario_id,
                outcome,
                reason,
            } => Self::ScenarioEnded {
                scenario_id,
                outcome,
                reason,
            },
        }
    }
}

impl From<&SessionError> for ServerMessage {
    fn from(err: &SessionError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Encode a server message as a websocket text frame.
pub fn encode(msg: &ServerMessage) -> Result<Message> {
    let json = serde_json::to_string(msg)?;
    Ok(Message::Text(json))
}

/// Decode a text or binary websocket frame into a client request.
pub fn decode(msg: Message) -> Result<ClientMessage> {
    match msg {
        Message::Text(text) => Ok(serde_json::from_str(&text)?),
        Message::Binary(bin) => Ok(serde_json::from_slice(&bin)?),
        _ => Err(anyhow::anyhow!("Unsupported message type")),
    }
}
