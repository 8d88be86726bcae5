//! HTTP server for the live-refreshing users dashboard.
//!
//! Serves the dashboard page, its JSON data feed, a health check and
//! Prometheus metrics. Rendering is driven by the `live_refresh` tasks
//! started through [`start_live_refresh`].

pub mod config;
pub mod error;
pub mod frame;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use live_refresh::{ChangeListener, EventCoalescer, ListenerError, RefreshScheduler, StatusHandle};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use user_store::UserStore;

use crate::config::Config;
use crate::frame::LatestFrame;

/// Shared state for the HTTP handlers.
pub struct AppState {
    pub frame: LatestFrame,
    pub status: StatusHandle,
    /// How often the page polls for a new frame.
    pub refresh_interval: Duration,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/", get(routes::dashboard::index))
        .route("/api/dashboard", get(routes::dashboard::data))
        .route("/health", get(routes::health::check))
        .with_state(state)
        .merge(metrics_router)
        .fallback(routes::dashboard::not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Handles to the running live-refresh tasks.
pub struct LiveRefresh {
    pub frame: LatestFrame,
    pub status: StatusHandle,
    pub listener: JoinHandle<Result<(), ListenerError>>,
    pub scheduler: JoinHandle<()>,
}

impl LiveRefresh {
    /// Application state backed by these tasks.
    pub fn app_state(&self, refresh_interval: Duration) -> Arc<AppState> {
        Arc::new(AppState {
            frame: self.frame.clone(),
            status: self.status.clone(),
            refresh_interval,
        })
    }

    /// Waits for both tasks to finish after shutdown was requested.
    pub async fn join(self) {
        match self.listener.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "change listener ended early"),
            Err(err) => tracing::error!(error = %err, "change listener task panicked"),
        }
        if let Err(err) = self.scheduler.await {
            tracing::error!(error = %err, "refresh scheduler task panicked");
        }
    }
}

/// Starts the change listener and the refresh scheduler against `store`.
///
/// Both tasks stop when `shutdown` is cancelled. A listener that runs out of
/// re-subscription attempts ends on its own; the scheduler keeps refreshing
/// on its timer.
pub fn start_live_refresh<S>(store: S, config: &Config, shutdown: CancellationToken) -> LiveRefresh
where
    S: UserStore + Clone + 'static,
{
    let coalescer = Arc::new(EventCoalescer::new());
    let frame = LatestFrame::new();

    let scheduler = Arc::new(RefreshScheduler::new(
        store.clone(),
        Arc::clone(&coalescer),
        frame.clone(),
        config.scheduler_config(),
    ));
    let status = scheduler.status_handle();

    let listener =
        ChangeListener::new(store, coalescer, config.retry_policy()).spawn(shutdown.clone());
    let scheduler = scheduler.spawn(shutdown);

    LiveRefresh {
        frame,
        status,
        listener,
        scheduler,
    }
}
