//! Per-client websocket handler.
//!
//! One task per connection selects between the shared event bus and the
//! client's own requests. A slow or dead client only hurts itself: a lagging
//! receiver skips ahead, a failed send ends this connection and nothing else.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::protocol::{self, ClientMessage, ServerMessage};
use crate::sessions::ScenarioSessions;

/// Serve one client until it disconnects or the bus closes.
pub async fn handle(socket: WebSocket, sessions: Arc<ScenarioSessions>) {
    let (sender, receiver) = socket.split();
    serve_client(sender, receiver, sessions).await;
}

/// The connection loop over any split websocket.
pub async fn serve_client<Tx, Rx>(
    mut sender: Tx,
    mut receiver: Rx,
    sessions: Arc<ScenarioSessions>,
) where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let conn_id = Uuid::new_v4();
    // Dropped on every exit path, which detaches the client.
    let mut events = sessions.subscribe();
    tracing::info!("Client {} connected", conn_id);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let Err(e) = send(&mut sender, &event.into()).await {
                        tracing::debug!("Client {} send failed: {}", conn_id, e);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Client {} lagged behind, skipped {} events", conn_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },

            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                    let reply = match protocol::decode(msg) {
                        Ok(request) => handle_request(&sessions, request),
                        Err(e) => {
                            tracing::warn!("Client {} sent a bad request: {}", conn_id, e);
                            ServerMessage::Error {
                                kind: "bad_request",
                                message: e.to_string(),
                            }
                        }
                    };
                    if let Err(e) = send(&mut sender, &reply).await {
                        tracing::debug!("Client {} send failed: {}", conn_id, e);
                        break;
                    }
                }
                Some(Ok(_)) => {} // ping/pong are answered by axum
                Some(Err(e)) => {
                    tracing::debug!("Client {} socket error: {}", conn_id, e);
                    break;
                }
            },
        }
    }

    drop(events);
    tracing::info!("Client {} disconnected", conn_id);
}

/// Act on one client request and build the reply for that client.
pub fn handle_request(sessions: &Arc<ScenarioSessions>, request: ClientMessage) -> ServerMessage {
    let result = match request {
        ClientMessage::StartScenario(start) => sessions
            .start(&start)
            .map(|run| ServerMessage::ScenarioStarted {
                scenario_id: run.scenario_id,
                speed: start.speed,
            }),
        ClientMessage::RunScenario { scenario_id, speed } => sessions
            .restart(scenario_id, speed)
            .map(|run| ServerMessage::ScenarioStarted {
                scenario_id: run.scenario_id,
                speed,
            }),
        ClientMessage::StopScenario { scenario_id } => sessions
            .stop(scenario_id)
            .map(|()| ServerMessage::ScenarioStopping { scenario_id }),
        ClientMessage::ListScenarios => Ok(ServerMessage::ScenarioList {
            scenarios: sessions.scenarios(),
            active: sessions.active_runs(),
        }),
    };

    result.unwrap_or_else(|e| {
        tracing::warn!("Request rejected: {}", e);
        ServerMessage::from(&e)
    })
}

async fn send<Tx>(sender: &mut Tx, msg: &ServerMessage) -> anyhow::Result<()>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    let frame = protocol::encode(msg)?;
    sender
        .send(frame)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
}
