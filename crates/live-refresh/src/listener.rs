//! Background task forwarding store mutations into the coalescer.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use user_store::{ChangeStream, UserStore};

use crate::EventCoalescer;
use crate::error::ListenerError;

/// Re-subscription policy for a dropped change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
    /// Delay before the first re-subscription attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the doubling delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the given (1-based) attempt: doubles each time, capped
    /// at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// How one subscription ended.
enum StreamEnd {
    Shutdown,
    Closed { received: u64 },
    Failed { error: String, received: u64 },
}

/// Subscribes to the store's change feed and marks the coalescer dirty once
/// per observed mutation.
///
/// A dropped feed is re-established with exponential backoff. While the feed
/// is down the coalescer is flagged as not watching, so the scheduler falls
/// back to timer-only refresh.
pub struct ChangeListener<S: UserStore> {
    store: S,
    coalescer: Arc<EventCoalescer>,
    retry: RetryPolicy,
}

impl<S: UserStore> ChangeListener<S> {
    pub fn new(store: S, coalescer: Arc<EventCoalescer>, retry: RetryPolicy) -> Self {
        Self {
            store,
            coalescer,
            retry,
        }
    }

    /// Runs until shutdown, or until re-subscription attempts are exhausted.
    ///
    /// Returns `Ok(())` on shutdown. The open subscription, if any, is
    /// dropped before returning.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ListenerError> {
        let mut attempts: u32 = 0;
        let mut reconnecting = false;

        loop {
            let subscribed = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                result = self.store.subscribe_to_changes() => result,
            };

            let last_error = match subscribed {
                Ok(stream) => {
                    self.coalescer.set_watching(true);
                    if reconnecting {
                        // Mutations during the gap were not observed.
                        self.coalescer.mark_dirty();
                        metrics::counter!("dashboard_listener_resubscribes_total").increment(1);
                        tracing::info!(attempts, "re-subscribed to user changes");
                    }

                    match self.forward(stream, &shutdown).await {
                        StreamEnd::Shutdown => return Ok(()),
                        StreamEnd::Closed { received } => {
                            if received > 0 {
                                attempts = 0;
                            }
                            tracing::warn!(received, "change stream closed");
                            "change stream closed".to_string()
                        }
                        StreamEnd::Failed { error, received } => {
                            if received > 0 {
                                attempts = 0;
                            }
                            tracing::warn!(received, %error, "change stream failed");
                            error
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "change subscription failed");
                    err.to_string()
                }
            };

            self.coalescer.set_watching(false);
            reconnecting = true;
            attempts += 1;

            if attempts > self.retry.max_attempts {
                tracing::error!(
                    attempts = self.retry.max_attempts,
                    error = %last_error,
                    "giving up on change feed; refreshing on timer only"
                );
                return Err(ListenerError::RetriesExhausted {
                    attempts: self.retry.max_attempts,
                    last_error,
                });
            }

            let delay = self.retry.backoff(attempts);
            tracing::debug!(attempt = attempts, ?delay, "re-subscribing after backoff");
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn forward(&self, mut stream: ChangeStream, shutdown: &CancellationToken) -> StreamEnd {
        let mut received = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return StreamEnd::Shutdown,
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        received += 1;
                        self.coalescer.mark_dirty();
                        metrics::counter!("dashboard_change_events_total").increment(1);
                        tracing::trace!(operation = event.operation(), "collection changed");
                    }
                    Some(Err(err)) => {
                        return StreamEnd::Failed { error: err.to_string(), received };
                    }
                    None => return StreamEnd::Closed { received },
                },
            }
        }
    }
}

impl<S: UserStore + 'static> ChangeListener<S> {
    /// Spawns the listener on the tokio runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<Result<(), ListenerError>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use user_store::{InMemoryUserStore, Record};

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn marks_dirty_for_each_change() {
        let store = InMemoryUserStore::new();
        let coalescer = Arc::new(EventCoalescer::new());
        let shutdown = CancellationToken::new();
        let handle = ChangeListener::new(store.clone(), coalescer.clone(), fast_retry(3))
            .spawn(shutdown.clone());

        wait_for(|| store.subscription_count() == 1).await;
        for age in 20..25 {
            store.insert(Record::new().with("age", age)).await;
        }
        let mut seen = 0;
        wait_for(|| {
            seen += coalescer.take_pending();
            seen >= 5
        })
        .await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(seen + coalescer.take_pending(), 5);
    }

    #[tokio::test]
    async fn resubscribes_after_stream_drop() {
        let store = InMemoryUserStore::new();
        let coalescer = Arc::new(EventCoalescer::new());
        let shutdown = CancellationToken::new();
        let handle = ChangeListener::new(store.clone(), coalescer.clone(), fast_retry(3))
            .spawn(shutdown.clone());

        wait_for(|| store.subscription_count() == 1).await;
        store.disconnect_subscribers().await;
        wait_for(|| store.subscription_count() == 2).await;

        // The gap is reported as a change.
        wait_for(|| coalescer.is_dirty()).await;
        assert!(coalescer.is_watching());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn gives_up_and_degrades_when_store_stays_down() {
        let store = InMemoryUserStore::new();
        let coalescer = Arc::new(EventCoalescer::new());
        let shutdown = CancellationToken::new();
        let handle = ChangeListener::new(store.clone(), coalescer.clone(), fast_retry(2))
            .spawn(shutdown.clone());

        wait_for(|| store.subscription_count() == 1).await;
        store.set_reachable(false).await;

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(ListenerError::RetriesExhausted { attempts: 2, .. })
        ));
        assert!(!coalescer.is_watching());
    }

    #[tokio::test]
    async fn recovers_when_store_comes_back() {
        let store = InMemoryUserStore::new();
        let coalescer = Arc::new(EventCoalescer::new());
        let shutdown = CancellationToken::new();
        let retry = RetryPolicy {
            max_attempts: 50,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(5),
        };
        let handle =
            ChangeListener::new(store.clone(), coalescer.clone(), retry).spawn(shutdown.clone());

        wait_for(|| store.subscription_count() == 1).await;
        store.set_reachable(false).await;
        wait_for(|| !coalescer.is_watching()).await;

        store.set_reachable(true).await;
        wait_for(|| store.subscription_count() == 2).await;
        wait_for(|| coalescer.is_watching()).await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_releases_subscription() {
        let store = InMemoryUserStore::new();
        let coalescer = Arc::new(EventCoalescer::new());
        let shutdown = CancellationToken::new();
        let handle = ChangeListener::new(store.clone(), coalescer, fast_retry(3))
            .spawn(shutdown.clone());

        wait_for(|| store.subscription_count() == 1).await;
        assert_eq!(store.subscriber_count().await, 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(store.subscriber_count().await, 0);
    }
}
