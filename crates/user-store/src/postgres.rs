use std::time::Instant;

use async_trait::async_trait;
use futures_util::stream;
use sqlx::postgres::{PgListener, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::{
    ChangeEvent, Record, Result, Snapshot, StoreError,
    store::{ChangeStream, UserStore},
};

/// Notification channel the users table triggers publish on.
pub const CHANGE_CHANNEL: &str = "users_changed";

/// PostgreSQL-backed user store.
///
/// Documents live in a JSONB column; a trigger publishes every mutation on
/// [`CHANGE_CHANNEL`], which [`UserStore::subscribe_to_changes`] listens to.
#[derive(Clone)]
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    /// Creates a new PostgreSQL user store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a small pool to the given database URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the users table and its change-capture triggers.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../../migrations/001_create_users_table.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts one user document.
    pub async fn insert(&self, record: &Record) -> Result<()> {
        let doc = serde_json::to_value(record)?;
        sqlx::query("INSERT INTO users (doc) VALUES ($1)")
            .bind(doc)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes every user document.
    pub async fn delete_all(&self) -> Result<()> {
        sqlx::query("TRUNCATE TABLE users")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<Record> {
        let id: i64 = row.try_get("id")?;
        let doc: serde_json::Value = row.try_get("doc")?;
        Record::try_from(doc).map_err(|source| StoreError::InvalidDocument { row: id, source })
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    #[tracing::instrument(skip(self))]
    async fn fetch_snapshot(&self) -> Result<Snapshot> {
        let start = Instant::now();
        let rows = sqlx::query(
            r#"
            SELECT id, doc
            FROM users
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>>>()?;

        metrics::histogram!("dashboard_snapshot_fetch_seconds")
            .record(start.elapsed().as_secs_f64());
        tracing::debug!(records = records.len(), "fetched users snapshot");
        Ok(Snapshot::new(records))
    }

    #[tracing::instrument(skip(self))]
    async fn subscribe_to_changes(&self) -> Result<ChangeStream> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        tracing::info!(channel = CHANGE_CHANNEL, "listening for user changes");

        // `try_recv` yields `Ok(None)` on a lost connection. Notifications
        // sent while disconnected are gone, so the stream ends there.
        let stream = stream::unfold(Some(listener), |listener| async move {
            let mut listener = listener?;
            match listener.try_recv().await {
                Ok(Some(notification)) => Some((
                    Ok(ChangeEvent::with_operation(notification.payload())),
                    Some(listener),
                )),
                Ok(None) => {
                    tracing::warn!(channel = CHANGE_CHANNEL, "change listener connection lost");
                    None
                }
                Err(e) => Some((Err(StoreError::Database(e)), None)),
            }
        });

        Ok(Box::pin(stream))
    }
}
