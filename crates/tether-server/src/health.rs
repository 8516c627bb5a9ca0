//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use tether_core::StatusSnapshot;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: &'static str,
    /// Connection phase.
    pub whatsapp: &'static str,
    pub reconnect_attempts: u32,
    pub server_name: String,
    pub uptime_secs: u64,
}

pub fn health_check(start_time: Instant, snapshot: &StatusSnapshot, server_name: &str) -> HealthResponse {
    HealthResponse {
        status: "ok",
        whatsapp: snapshot.phase.as_str(),
        reconnect_attempts: snapshot.reconnect_attempts,
        server_name: server_name.to_string(),
        uptime_secs: start_time.elapsed().as_secs(),
    }
}
