//! Live-refresh error types.

use thiserror::Error;
use user_store::StoreError;

/// Errors that end the change listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The subscription could not be re-established.
    #[error("Gave up re-subscribing to changes after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Errors that fail a single refresh tick.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The snapshot could not be fetched from the store.
    #[error("Snapshot fetch failed: {0}")]
    Fetch(#[from] StoreError),
}
