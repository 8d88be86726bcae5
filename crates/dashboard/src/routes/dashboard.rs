//! Dashboard page and its data endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::Html;
use live_refresh::SchedulerStatus;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;
use crate::frame::Frame;

const PAGE: &str = include_str!("dashboard.html");

#[derive(Serialize)]
pub struct DashboardResponse {
    #[serde(flatten)]
    pub frame: Frame,
    /// True when the latest refresh failed and the frame is from an earlier tick.
    pub stale: bool,
    pub scheduler: SchedulerStatus,
}

/// GET /: the dashboard page. It polls `/api/dashboard` at the refresh
/// interval and keeps its last content when a poll fails.
pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    let refresh_ms = state.refresh_interval.as_millis().to_string();
    Html(PAGE.replace("{{REFRESH_MS}}", &refresh_ms))
}

/// GET /api/dashboard: the last successfully rendered frame.
#[tracing::instrument(skip(state))]
pub async fn data(State(state): State<Arc<AppState>>) -> Result<Json<DashboardResponse>, ApiError> {
    let frame = state
        .frame
        .current()
        .await
        .ok_or_else(|| ApiError::Unavailable("no successful refresh yet".to_string()))?;
    let scheduler = state.status.get().await;

    Ok(Json(DashboardResponse {
        frame: Frame::clone(&frame),
        stale: scheduler.consecutive_failures > 0,
        scheduler,
    }))
}

/// Fallback for unknown paths.
pub async fn not_found() -> ApiError {
    ApiError::NotFound("no such page".to_string())
}
