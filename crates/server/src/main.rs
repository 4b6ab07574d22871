use std::sync::Arc;

use clap::Parser;
use scenario_engine::{ScenarioBackend, ScenarioStore};
use scenario_server::broadcast_loop::BroadcastLoop;
use scenario_server::config::ServerConfig;
use scenario_server::event_bus;
use scenario_server::metrics::Metrics;
use scenario_server::net;
use scenario_server::sessions::ScenarioSessions;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Scenario server -- one loop per scenario, broadcast to every client");
    tracing::debug!("{:?}", config);

    let backend: Arc<dyn ScenarioBackend> = Arc::new(ScenarioStore::with_seed(config.seed));
    let bus = event_bus::channel(config.bus_capacity);
    let metrics = Arc::new(Metrics::new());
    let runner = Arc::new(BroadcastLoop::new(
        backend,
        bus,
        Arc::clone(&metrics),
        config.time_unit(),
    ));
    let sessions = Arc::new(
        ScenarioSessions::new(runner, metrics, !config.keep_idle_runs)
            .with_max_entities(config.max_entities),
    );

    let listener = TcpListener::bind(&config.bind).await?;
    tracing::info!("Listening on http://{} (websocket at /ws)", config.bind);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Ctrl+C received, shutting down...");
    };

    // Runs are cancelled before connections drain so clients see them end.
    let server_sessions = Arc::clone(&sessions);
    let stop_sessions = Arc::clone(&sessions);
    let result = net::server::serve(listener, server_sessions, async move {
        shutdown.await;
        let cancelled = stop_sessions.shutdown();
        tracing::info!("Cancelled {} active runs", cancelled);
    })
    .await;

    if let Err(e) = &result {
        tracing::error!("Server error: {:#}", e);
    }
    result
}
