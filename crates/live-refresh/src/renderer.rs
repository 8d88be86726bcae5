use async_trait::async_trait;
use common::Snapshot;

use crate::AggregateView;

/// Presentation side of the refresh cycle.
///
/// Called once per successful tick with a fresh snapshot and its aggregates.
/// Rendering is a pure side effect; nothing is returned to the scheduler.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, snapshot: Snapshot, view: AggregateView);
}
