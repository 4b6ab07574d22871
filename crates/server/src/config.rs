//! Command-line and environment configuration.

use std::time::Duration;

use clap::Parser;

use crate::event_bus::BUS_CAPACITY;
use crate::sessions::MAX_ENTITIES;

#[derive(Debug, Clone, Parser)]
#[command(name = "scenario-server", version, about = "Run scenarios and stream their state to websocket clients")]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, env = "SCENARIO_BIND", default_value = "0.0.0.0:9010")]
    pub bind: String,

    /// Wall-clock length of one abstract time unit, in milliseconds.
    #[arg(long, env = "SCENARIO_TIME_UNIT_MS", default_value_t = 1000)]
    pub time_unit_ms: u64,

    /// Events a client may fall behind before it skips ahead.
    #[arg(long, env = "SCENARIO_BUS_CAPACITY", default_value_t = BUS_CAPACITY)]
    pub bus_capacity: usize,

    /// Base seed for scenario generation.
    #[arg(long, env = "SCENARIO_SEED", default_value_t = 0)]
    pub seed: u64,

    /// Largest vehicle or customer count a start request may ask for.
    #[arg(long, env = "SCENARIO_MAX_ENTITIES", default_value_t = MAX_ENTITIES)]
    pub max_entities: usize,

    /// Keep runs going after the last client disconnects.
    #[arg(long, env = "SCENARIO_KEEP_IDLE_RUNS")]
    pub keep_idle_runs: bool,
}

impl ServerConfig {
    pub fn time_unit(&self) -> Duration {
        Duration::from_millis(self.time_unit_ms)
    }
}
