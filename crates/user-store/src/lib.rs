//! User document store for the live dashboard.
//!
//! - [`UserStore`] trait: full-collection snapshots plus a change-capture stream
//! - [`PostgresUserStore`]: JSONB table with `LISTEN/NOTIFY` change capture
//! - [`InMemoryUserStore`]: in-process store for tests and local runs

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{ChangeEvent, Record, Snapshot};
pub use error::{Result, StoreError};
pub use memory::InMemoryUserStore;
pub use postgres::{CHANGE_CHANNEL, PostgresUserStore};
pub use store::{ChangeStream, UserStore};
