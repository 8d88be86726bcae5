//! Fixed-interval fetch, aggregate and render loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use user_store::UserStore;

use crate::error::RefreshError;
use crate::{AggregateView, EventCoalescer, HistogramConfig, Renderer};

/// Default refresh period.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Smallest accepted refresh period.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

/// Whether a tick needs pending changes to refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshPolicy {
    /// Drain the dirty flag and refresh on every tick.
    #[default]
    Always,
    /// Refresh only when a change was coalesced since the previous tick.
    ///
    /// A refresh still happens when nothing has been rendered yet, when the
    /// previous fetch failed, or while the change feed is down.
    OnChange,
}

impl std::fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshPolicy::Always => write!(f, "always"),
            RefreshPolicy::OnChange => write!(f, "on-change"),
        }
    }
}

impl std::str::FromStr for RefreshPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(RefreshPolicy::Always),
            "on-change" | "on_change" | "onchange" => Ok(RefreshPolicy::OnChange),
            other => Err(format!("unknown refresh policy: {other}")),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub policy: RefreshPolicy,
    pub histogram: HistogramConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REFRESH_INTERVAL,
            policy: RefreshPolicy::default(),
            histogram: HistogramConfig::default(),
        }
    }
}

/// Where the scheduler is within a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Fetching,
    Aggregating,
    Rendering,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "Idle"),
            SchedulerState::Fetching => write!(f, "Fetching"),
            SchedulerState::Aggregating => write!(f, "Aggregating"),
            SchedulerState::Rendering => write!(f, "Rendering"),
            SchedulerState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A fresh snapshot was fetched and rendered.
    Rendered { records: usize, coalesced: u64 },
    /// Nothing changed; the previous render stands.
    Skipped,
    /// The store could not be read; the previous render stands.
    FetchFailed,
}

/// Observable scheduler progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub ticks: u64,
    pub renders: u64,
    pub skipped: u64,
    pub consecutive_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Whether a live change feed currently backs the dirty flag.
    pub watching: bool,
}

/// Cloneable read access to a scheduler's status.
#[derive(Clone)]
pub struct StatusHandle {
    status: Arc<RwLock<SchedulerStatus>>,
    coalescer: Arc<EventCoalescer>,
}

impl StatusHandle {
    pub async fn get(&self) -> SchedulerStatus {
        let mut status = self.status.read().await.clone();
        status.watching = self.coalescer.is_watching();
        status
    }
}

/// Drives the render cycle on a fixed interval.
///
/// Each tick drains the [`EventCoalescer`], then (subject to the
/// [`RefreshPolicy`]) fetches a snapshot, builds the [`AggregateView`] and
/// hands both to the [`Renderer`]. Ticks never overlap. A failed fetch is
/// logged and leaves the previous render in place.
pub struct RefreshScheduler<S: UserStore, R: Renderer> {
    store: S,
    coalescer: Arc<EventCoalescer>,
    renderer: R,
    config: SchedulerConfig,
    status: Arc<RwLock<SchedulerStatus>>,
    tick_lock: Mutex<()>,
}

impl<S: UserStore, R: Renderer> RefreshScheduler<S, R> {
    pub fn new(
        store: S,
        coalescer: Arc<EventCoalescer>,
        renderer: R,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            coalescer,
            renderer,
            config,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
            tick_lock: Mutex::new(()),
        }
    }

    /// Returns a handle for reading the scheduler status from elsewhere.
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            status: Arc::clone(&self.status),
            coalescer: Arc::clone(&self.coalescer),
        }
    }

    /// Current status snapshot.
    pub async fn status(&self) -> SchedulerStatus {
        self.status_handle().get().await
    }

    /// Ticks until shutdown. The first tick fires immediately; a tick that
    /// overruns the interval causes the missed ticks to be skipped.
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.config.interval.max(MIN_REFRESH_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_ms = period.as_millis() as u64,
            policy = %self.config.policy,
            "refresh scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        self.set_state(SchedulerState::Stopped).await;
        tracing::info!("refresh scheduler stopped");
    }

    /// Runs one refresh cycle.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> TickOutcome {
        let _serialized = self.tick_lock.lock().await;

        let coalesced = self.coalescer.take_pending();
        metrics::counter!("dashboard_refresh_ticks_total").increment(1);

        if !self.should_refresh(coalesced > 0).await {
            let mut status = self.status.write().await;
            status.ticks += 1;
            status.skipped += 1;
            metrics::counter!("dashboard_refresh_skipped_total").increment(1);
            tracing::debug!("no changes since last render; skipping");
            return TickOutcome::Skipped;
        }

        self.set_state(SchedulerState::Fetching).await;
        let snapshot = match self.store.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let err = RefreshError::from(err);
                metrics::counter!("dashboard_fetch_failures_total").increment(1);
                let mut status = self.status.write().await;
                status.state = SchedulerState::Idle;
                status.ticks += 1;
                status.consecutive_failures += 1;
                status.last_error = Some(err.to_string());
                tracing::warn!(
                    error = %err,
                    consecutive_failures = status.consecutive_failures,
                    "refresh failed; keeping previous render"
                );
                return TickOutcome::FetchFailed;
            }
        };

        self.set_state(SchedulerState::Aggregating).await;
        let view = AggregateView::from_snapshot(&snapshot, &self.config.histogram);
        let records = snapshot.len();
        metrics::gauge!("dashboard_snapshot_records").set(records as f64);

        self.set_state(SchedulerState::Rendering).await;
        self.renderer.render(snapshot, view).await;

        let mut status = self.status.write().await;
        status.state = SchedulerState::Idle;
        status.ticks += 1;
        status.renders += 1;
        status.consecutive_failures = 0;
        status.last_success = Some(Utc::now());
        status.last_error = None;
        tracing::debug!(records, coalesced, "dashboard refreshed");

        TickOutcome::Rendered { records, coalesced }
    }

    async fn should_refresh(&self, dirty: bool) -> bool {
        match self.config.policy {
            RefreshPolicy::Always => true,
            RefreshPolicy::OnChange => {
                if dirty || !self.coalescer.is_watching() {
                    return true;
                }
                let status = self.status.read().await;
                status.last_success.is_none() || status.consecutive_failures > 0
            }
        }
    }

    async fn set_state(&self, state: SchedulerState) {
        self.status.write().await.state = state;
    }
}

impl<S: UserStore + 'static, R: Renderer + 'static> RefreshScheduler<S, R> {
    /// Spawns the scheduler loop on the tokio runtime.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
