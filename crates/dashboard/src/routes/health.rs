//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use live_refresh::SchedulerStatus;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// False once the change feed is lost; refreshes continue on the timer.
    pub watching: bool,
    pub scheduler: SchedulerStatus,
}

/// GET /health: process liveness plus live-refresh status.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let scheduler = state.status.get().await;
    Json(HealthResponse {
        status: "ok",
        watching: scheduler.watching,
        scheduler,
    })
}
