//! Renderer that keeps the last successful frame for the HTTP surface.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Record, Snapshot};
use live_refresh::{AgeHistogram, AggregateView, CountryTally, Renderer};
use serde::Serialize;
use tokio::sync::RwLock;

/// Everything the dashboard page shows for one refresh.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub rendered_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub total_users: usize,
    pub records: Vec<Record>,
    pub age_histogram: AgeHistogram,
    pub country_tally: CountryTally,
}

/// Holds the most recent frame.
///
/// Only successful refreshes reach a renderer, so readers always see the
/// last good render, even while the store is failing.
#[derive(Clone, Default)]
pub struct LatestFrame {
    current: Arc<RwLock<Option<Arc<Frame>>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last rendered frame, if any refresh has succeeded yet.
    pub async fn current(&self) -> Option<Arc<Frame>> {
        self.current.read().await.clone()
    }
}

#[async_trait]
impl Renderer for LatestFrame {
    async fn render(&self, snapshot: Snapshot, view: AggregateView) {
        let frame = Frame {
            rendered_at: Utc::now(),
            fetched_at: snapshot.fetched_at,
            total_users: snapshot.len(),
            records: snapshot.records,
            age_histogram: view.age_histogram,
            country_tally: view.country_tally,
        };
        tracing::info!(users = frame.total_users, "dashboard frame updated");
        *self.current.write().await = Some(Arc::new(frame));
    }
}
