//! Scenario server: runs scenarios on their own clocks and keeps every
//! connected websocket client in sync with them.

pub mod broadcast_loop;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod metrics;
pub mod net;
pub mod remaining;
pub mod sessions;
