//! Shared types for the live user dashboard.
//!
//! - [`Record`]: one schema-free user document
//! - [`Snapshot`]: a point-in-time read of the whole users collection
//! - [`ChangeEvent`]: an opaque "the collection was mutated" token

pub mod snapshot;
pub mod types;

pub use snapshot::Snapshot;
pub use types::{ChangeEvent, NotAnObject, Record};
