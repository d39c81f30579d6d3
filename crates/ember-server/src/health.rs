//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::websocket::dispatch::RelayStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` while the server is running.
    pub status: &'static str,
    pub uptime_secs: u64,
    /// Open connections as of the dispatcher's last event.
    pub connections: usize,
    /// Messages received since process start.
    pub messages: u64,
    pub port: u16,
}

pub fn health_check(start_time: Instant, stats: &RelayStats, port: u16) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.connections,
        messages: stats.messages,
        port,
    }
}
