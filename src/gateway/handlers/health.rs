//! Health check handler.

use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::gateway::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthData {
    pub status: &'static str,
    pub version: &'static str,
    pub build: &'static str,
    pub sessions: usize,
    pub function_groups: usize,
}

/// Liveness probe with hub statistics.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses((status = 200, description = "Service healthy", body = HealthData)),
    tag = "health"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthData> {
    let (function_groups, sessions) = state.hub.stats();
    Json(HealthData {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        build: env!("GIT_HASH"),
        sessions,
        function_groups,
    })
}
