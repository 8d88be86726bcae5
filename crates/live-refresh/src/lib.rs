//! Live-refresh core for the user dashboard.
//!
//! Two tasks cooperate through one synchronized handoff point:
//! - [`ChangeListener`] forwards store mutations into the [`EventCoalescer`]
//! - [`RefreshScheduler`] drains the coalescer on a fixed interval and runs
//!   fetch, aggregate and render
//!
//! [`AggregateView`] holds the per-cycle summaries handed to a [`Renderer`].

pub mod aggregate;
pub mod coalescer;
pub mod error;
pub mod listener;
pub mod renderer;
pub mod scheduler;

pub use aggregate::{
    AgeBucket, AgeHistogram, AggregateView, CountryCount, CountryTally, HistogramConfig,
    MIN_BIN_WIDTH,
};
pub use coalescer::EventCoalescer;
pub use error::{ListenerError, RefreshError};
pub use listener::{ChangeListener, RetryPolicy};
pub use renderer::Renderer;
pub use scheduler::{
    RefreshPolicy, RefreshScheduler, SchedulerConfig, SchedulerState, SchedulerStatus,
    StatusHandle, TickOutcome,
};
