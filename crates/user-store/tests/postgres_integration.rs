//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p user-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use user_store::{PostgresUserStore, Record, StoreError, UserStore};

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let store = PostgresUserStore::connect(&connection_string).await.unwrap();
            store.run_migrations().await.unwrap();
            store.pool().close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and an empty users table
async fn get_test_store() -> PostgresUserStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE users")
        .execute(&pool)
        .await
        .unwrap();

    PostgresUserStore::new(pool)
}

fn user(name: &str, age: i64, country: &str) -> Record {
    Record::new()
        .with("name", name)
        .with("age", age)
        .with("country", country)
}

#[tokio::test]
async fn fetch_snapshot_returns_records_in_insertion_order() {
    let store = get_test_store().await;

    store.insert(&user("Ana", 25, "US")).await.unwrap();
    store.insert(&user("Ben", 30, "US")).await.unwrap();
    store.insert(&user("Cai", 40, "CA")).await.unwrap();

    let snapshot = store.fetch_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 3);
    let names: Vec<_> = snapshot
        .records
        .iter()
        .map(|r| r.get("name").and_then(|v| v.as_str()).unwrap())
        .collect();
    assert_eq!(names, vec!["Ana", "Ben", "Cai"]);
}

#[tokio::test]
async fn fetch_snapshot_on_empty_table() {
    let store = get_test_store().await;
    let snapshot = store.fetch_snapshot().await.unwrap();
    assert!(snapshot.is_empty());
}

#[tokio::test]
async fn identity_field_is_not_exposed() {
    let store = get_test_store().await;

    sqlx::query("INSERT INTO users (doc) VALUES ($1)")
        .bind(serde_json::json!({"_id": "65f0c2", "age": 22, "country": "CL"}))
        .execute(store.pool())
        .await
        .unwrap();

    let snapshot = store.fetch_snapshot().await.unwrap();
    assert!(snapshot.records[0].get("_id").is_none());
    assert_eq!(snapshot.records[0].country(), Some("CL"));
}

#[tokio::test]
async fn non_object_document_is_reported() {
    let store = get_test_store().await;

    sqlx::query("INSERT INTO users (doc) VALUES ($1)")
        .bind(serde_json::json!("not a user"))
        .execute(store.pool())
        .await
        .unwrap();

    let result = store.fetch_snapshot().await;
    assert!(matches!(result, Err(StoreError::InvalidDocument { .. })));
}

#[tokio::test]
async fn subscription_receives_insert_and_truncate() {
    let store = get_test_store().await;
    let mut changes = store.subscribe_to_changes().await.unwrap();

    store.insert(&user("Ana", 25, "US")).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), changes.next())
        .await
        .expect("no notification for insert")
        .unwrap()
        .unwrap();
    assert_eq!(event.operation(), Some("INSERT"));

    store.delete_all().await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), changes.next())
        .await
        .expect("no notification for truncate")
        .unwrap()
        .unwrap();
    assert_eq!(event.operation(), Some("TRUNCATE"));
}

#[tokio::test]
async fn subscription_receives_updates() {
    let store = get_test_store().await;
    store.insert(&user("Ana", 25, "US")).await.unwrap();

    let mut changes = store.subscribe_to_changes().await.unwrap();

    sqlx::query("UPDATE users SET doc = jsonb_set(doc, '{age}', '26')")
        .execute(store.pool())
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), changes.next())
        .await
        .expect("no notification for update")
        .unwrap()
        .unwrap();
    assert_eq!(event.operation(), Some("UPDATE"));

    let snapshot = store.fetch_snapshot().await.unwrap();
    assert_eq!(snapshot.records[0].age(), Some(26.0));
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let store = get_test_store().await;
    store.run_migrations().await.unwrap();
    store.run_migrations().await.unwrap();
    assert!(store.fetch_snapshot().await.is_ok());
}

#[tokio::test]
async fn closed_pool_fails_fetch() {
    let store = get_test_store().await;
    store.pool().close().await;

    let result = store.fetch_snapshot().await;
    assert!(matches!(result, Err(StoreError::Database(_))));
}

/// Kills every backend currently running `LISTEN`.
async fn terminate_listeners(store: &PostgresUserStore) {
    sqlx::query(
        r#"
        SELECT pg_terminate_backend(pid)
        FROM pg_stat_activity
        WHERE pid <> pg_backend_pid() AND query ILIKE 'LISTEN%'
        "#,
    )
    .execute(store.pool())
    .await
    .unwrap();
}

#[tokio::test]
async fn subscription_ends_when_connection_is_lost() {
    let store = get_test_store().await;
    let mut changes = store.subscribe_to_changes().await.unwrap();

    terminate_listeners(&store).await;
    store.insert(&user("Ana", 25, "US")).await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), changes.next())
        .await
        .expect("stream kept waiting after its connection was lost");
    assert!(
        !matches!(next, Some(Ok(_))),
        "a notification arrived on a terminated connection"
    );

    // A fresh subscription sees later changes again.
    let mut changes = store.subscribe_to_changes().await.unwrap();
    store.insert(&user("Ben", 30, "US")).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), changes.next())
        .await
        .expect("no notification after re-subscribing")
        .unwrap()
        .unwrap();
    assert_eq!(event.operation(), Some("INSERT"));
}
