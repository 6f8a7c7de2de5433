//! `PgDataStore` 集成测试（需要 `DATABASE_URL`）
#![cfg(feature = "postgres")]

use outbox_core::clock::{ManualClock, SystemClock};
use outbox_core::event::{EventId, NewEvent, Options, SnowflakeGenerator};
use outbox_core::persist::{DataStore, OUTBOX_TABLE, PgDataStore, StoreTx};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

fn store(pool: PgPool) -> PgDataStore {
    let ids = SnowflakeGenerator::new(1, SystemClock).unwrap();
    PgDataStore::new(pool, Arc::new(ids))
}

fn event(payload: &str) -> NewEvent {
    NewEvent::builder()
        .payload(payload.as_bytes())
        .options(Options::from([("channel".to_string(), json!("orders"))]))
        .headers(Options::from([("trace_id".to_string(), json!("t-1"))]))
        .build()
}

async fn dispatch_one(store: &PgDataStore) -> Option<EventId> {
    let mut tx = store.get_tx().await.unwrap();
    let record = store.get_event(&mut tx).await.unwrap()?;
    store.set_as_dispatched(&mut tx, record.id()).await.unwrap();
    tx.commit().await.unwrap();
    Some(record.id())
}

#[sqlx::test(migrations = "./migrations")]
async fn migration_creates_outbox_table(pool: PgPool) {
    let exists: (bool,) = sqlx::query_as("SELECT to_regclass($1) IS NOT NULL")
        .bind(OUTBOX_TABLE)
        .fetch_one(&pool)
        .await
        .unwrap();

    assert!(exists.0);
}

#[sqlx::test(migrations = "./migrations")]
async fn add_and_get_round_trip_all_columns(pool: PgPool) {
    let store = store(pool);

    let id = store.add(event("evt-A")).await.unwrap();
    let record = store.get(id).await.unwrap().unwrap();

    assert_eq!(record.id(), id);
    assert!(!record.is_dispatched());
    assert_eq!(record.dispatched_at(), None);
    assert_eq!(record.payload(), b"evt-A");
    assert_eq!(record.options().get("channel"), Some(&json!("orders")));
    assert_eq!(record.headers().get("trace_id"), Some(&json!("t-1")));
}

#[sqlx::test(migrations = "./migrations")]
async fn get_event_claims_oldest_pending(pool: PgPool) {
    let store = store(pool);
    let first = store.add(event("1")).await.unwrap();
    let second = store.add(event("2")).await.unwrap();

    assert_eq!(dispatch_one(&store).await, Some(first));
    assert_eq!(dispatch_one(&store).await, Some(second));
    assert_eq!(dispatch_one(&store).await, None);

    let record = store.get(first).await.unwrap().unwrap();
    assert!(record.is_dispatched());
    assert!(record.dispatched_at().is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn rollback_keeps_record_pending(pool: PgPool) {
    let store = store(pool);
    let id = store.add(event("a")).await.unwrap();

    let mut tx = store.get_tx().await.unwrap();
    store.get_event(&mut tx).await.unwrap().unwrap();
    store.set_as_dispatched(&mut tx, id).await.unwrap();
    tx.rollback().await.unwrap();

    assert!(!store.get(id).await.unwrap().unwrap().is_dispatched());
}

#[sqlx::test(migrations = "./migrations")]
async fn locked_row_blocks_second_claimant(pool: PgPool) {
    let store = store(pool).with_statement_timeout(Duration::from_millis(300));
    store.add(event("a")).await.unwrap();

    let mut holder = store.get_tx().await.unwrap();
    store.get_event(&mut holder).await.unwrap().unwrap();

    // 行锁被持有期间，第二个事务在 statement_timeout 后失败
    let mut contender = store.get_tx().await.unwrap();
    let err = store.get_event(&mut contender).await.unwrap_err();
    assert!(err.is_storage());

    holder.rollback().await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
async fn set_as_dispatched_rejects_non_pending(pool: PgPool) {
    let store = store(pool);
    let id = store.add(event("a")).await.unwrap();
    dispatch_one(&store).await.unwrap();

    let mut tx = store.get_tx().await.unwrap();
    let err = store.set_as_dispatched(&mut tx, id).await.unwrap_err();

    assert!(err.is_storage());
}

#[sqlx::test(migrations = "./migrations")]
async fn add_in_commits_with_caller_transaction(pool: PgPool) {
    let store = store(pool);

    let mut tx = store.get_tx().await.unwrap();
    let id = store.add_in(&mut tx, event("a")).await.unwrap();
    assert!(store.get(id).await.unwrap().is_none());

    tx.commit().await.unwrap();
    assert!(store.get(id).await.unwrap().is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn remove_deletes_expired_in_batches(pool: PgPool) {
    let clock = Arc::new(ManualClock::default());
    let store = store(pool).with_clock(clock.clone());
    for i in 0..3 {
        store.add(event(&i.to_string())).await.unwrap();
    }
    let pending = store.add(event("pending")).await.unwrap();
    for _ in 0..3 {
        dispatch_one(&store).await.unwrap();
    }

    let retention = Duration::from_secs(60);
    assert_eq!(store.remove(retention, 10).await.unwrap(), 0);

    clock.advance(chrono::Duration::seconds(61));
    assert_eq!(store.remove(retention, 2).await.unwrap(), 2);
    assert_eq!(store.remove(retention, 2).await.unwrap(), 1);
    assert_eq!(store.remove(retention, 2).await.unwrap(), 0);

    assert!(store.get(pending).await.unwrap().is_some());
}
