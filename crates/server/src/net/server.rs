//! axum HTTP server.
//!
//! Serves a liveness line at `/`, the client websocket at `/ws`, and two JSON
//! read-outs: `/scenarios` and `/metrics`.

use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::json;
use tokio::net::TcpListener;

use crate::sessions::ScenarioSessions;

pub fn router(sessions: Arc<ScenarioSessions>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_upgrade))
        .route("/scenarios", get(scenarios))
        .route("/metrics", get(metrics))
        .with_state(sessions)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    sessions: Arc<ScenarioSessions>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(sessions);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn index() -> &'static str {
    "Scenario server is running."
}

/// Upgrade an HTTP request to a client websocket.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(sessions): State<Arc<ScenarioSessions>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| super::connection::handle(socket, sessions))
}

async fn scenarios(State(sessions): State<Arc<ScenarioSessions>>) -> impl IntoResponse {
    Json(json!({
        "scenarios": sessions.scenarios(),
        "active": sessions.active_runs(),
    }))
}

async fn metrics(State(sessions): State<Arc<ScenarioSessions>>) -> impl IntoResponse {
    Json(sessions.metrics())
}
