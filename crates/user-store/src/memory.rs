use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use crate::{
    ChangeEvent, Record, Result, Snapshot, StoreError,
    store::{ChangeStream, UserStore},
};

/// Capacity of the change feed; slower subscribers see a single coalesced
/// event for anything they missed.
const CHANGE_FEED_CAPACITY: usize = 256;

/// In-memory user store implementation for testing and local runs.
///
/// Provides the same interface as the PostgreSQL implementation, plus knobs
/// to simulate an unreachable store and dropped subscriptions.
#[derive(Clone)]
pub struct InMemoryUserStore {
    records: Arc<RwLock<Vec<Record>>>,
    changes: Arc<RwLock<broadcast::Sender<ChangeEvent>>>,
    reachable: Arc<AtomicBool>,
    fetches: Arc<AtomicU64>,
    subscriptions: Arc<AtomicU64>,
}

impl InMemoryUserStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            changes: Arc::new(RwLock::new(tx)),
            reachable: Arc::new(AtomicBool::new(true)),
            fetches: Arc::new(AtomicU64::new(0)),
            subscriptions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a store pre-populated with records. No change events are
    /// published for the initial contents.
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            records: Arc::new(RwLock::new(records.into_iter().collect())),
            ..Self::new()
        }
    }

    /// Appends a record and publishes an `INSERT` change.
    pub async fn insert(&self, record: Record) {
        self.records.write().await.push(record);
        self.publish("INSERT").await;
    }

    /// Removes every record and publishes a `DELETE` change.
    pub async fn delete_all(&self) {
        self.records.write().await.clear();
        self.publish("DELETE").await;
    }

    /// Returns the number of stored records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Makes the store reachable or unreachable.
    ///
    /// While unreachable, fetches and new subscriptions fail. Going
    /// unreachable also ends every open change stream.
    pub async fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.disconnect_subscribers().await;
        }
    }

    /// Ends every open change stream, as a dropped connection would.
    pub async fn disconnect_subscribers(&self) {
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        *self.changes.write().await = tx;
    }

    /// Number of `fetch_snapshot` calls that reached the store.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of successful `subscribe_to_changes` calls.
    pub fn subscription_count(&self) -> u64 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Number of currently open change streams.
    pub async fn subscriber_count(&self) -> usize {
        self.changes.read().await.receiver_count()
    }

    async fn publish(&self, operation: &str) {
        // No subscribers is not an error.
        let _ = self
            .changes
            .read()
            .await
            .send(ChangeEvent::with_operation(operation));
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked unreachable".to_string()))
        }
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn fetch_snapshot(&self) -> Result<Snapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()?;
        let records = self.records.read().await.clone();
        Ok(Snapshot::new(records))
    }

    async fn subscribe_to_changes(&self) -> Result<ChangeStream> {
        use futures_util::stream;
        use tokio::sync::broadcast::error::RecvError;

        self.ensure_reachable()?;
        let rx = self.changes.read().await.subscribe();
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        let stream = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "change feed lagged");
                    Some((Ok(ChangeEvent::new()), rx))
                }
                Err(RecvError::Closed) => None,
            }
        });

        Ok(Box::pin(stream))
    }
}
