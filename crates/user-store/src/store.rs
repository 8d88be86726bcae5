use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{ChangeEvent, Result, Snapshot};

/// A push-based stream of change notifications.
///
/// The stream ends when the subscription is closed by the store; an `Err`
/// item means the underlying connection failed.
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent>> + Send>>;

/// Source of user records for the dashboard.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Reads the full users collection.
    ///
    /// No filtering and no projection beyond dropping the store's identity
    /// field. Records are returned in insertion order.
    async fn fetch_snapshot(&self) -> Result<Snapshot>;

    /// Opens a long-lived subscription that yields one [`ChangeEvent`] per
    /// mutation of the users collection.
    ///
    /// Dropping the returned stream closes the subscription.
    async fn subscribe_to_changes(&self) -> Result<ChangeStream>;
}
