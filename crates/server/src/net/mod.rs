//! Websocket transport: HTTP routes, per-client connections, wire messages.

pub mod connection;
pub mod protocol;
pub mod server;
