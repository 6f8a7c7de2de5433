//! Outbox 示例：PostgreSQL 存储 + Redis 发布
//!
//! 下单与事件入队在同一事务中提交，后台调度器随后把事件发布到 Redis 的 `orders` 通道。
//! 运行前设置 `DATABASE_URL`（可写在 `.env`），Redis 默认连接本机。

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use outbox_core::clock::SystemClock;
use outbox_core::config::OutboxConfig;
use outbox_core::event::{NewEvent, Options, SnowflakeGenerator};
use outbox_core::eventing::{CHANNEL_OPTION, Outbox, RedisEventStream};
use outbox_core::persist::{DataStore, PgDataStore, StoreTx};
use serde::Serialize;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct OrderPlaced {
    order_id: i64,
    sku: String,
    quantity: u32,
    placed_at: DateTime<Utc>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("{key} is malformed")),
        Err(_) => Ok(default),
    }
}

async fn place_order(
    outbox: &Outbox<PgDataStore, RedisEventStream>,
    sku: &str,
    quantity: u32,
) -> Result<()> {
    let store = outbox.store();
    let mut tx = store.get_tx().await?;

    let (order_id,): (i64,) =
        sqlx::query_as("INSERT INTO demo_orders (sku, quantity) VALUES ($1, $2) RETURNING id")
            .bind(sku)
            .bind(i32::try_from(quantity)?)
            .fetch_one(&mut *tx)
            .await?;

    let payload = serde_json::to_vec(&OrderPlaced {
        order_id,
        sku: sku.to_string(),
        quantity,
        placed_at: Utc::now(),
    })?;
    let event = NewEvent::builder()
        .payload(payload)
        .options(Options::from([(CHANNEL_OPTION.to_string(), json!("orders"))]))
        .headers(Options::from([(
            "content_type".to_string(),
            json!("application/json"),
        )]))
        .build();
    let event_id = outbox.enqueue_in(&mut tx, event).await?;

    tx.commit().await?;
    outbox.notify();

    tracing::info!(order_id, %event_id, "order placed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string());
    let machine_id: u16 = env_or("OUTBOX_MACHINE_ID", 0)?;
    let statement_timeout_ms: u64 = env_or("OUTBOX_STATEMENT_TIMEOUT_MS", 5_000)?;
    let config = OutboxConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    let ids = SnowflakeGenerator::new(machine_id, SystemClock)?;
    let store = PgDataStore::new(pool.clone(), Arc::new(ids))
        .with_statement_timeout(Duration::from_millis(statement_timeout_ms));
    store.migrate().await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS demo_orders ( \
             id BIGSERIAL PRIMARY KEY, \
             sku TEXT NOT NULL, \
             quantity INT NOT NULL \
         )",
    )
    .execute(&pool)
    .await?;

    let stream = RedisEventStream::connect(&redis_url).await?;
    let outbox = Outbox::new(Arc::new(store), Arc::new(stream), config)?;

    let token = CancellationToken::new();
    let mut handle = outbox.start(token.clone());

    if let Some(mut errors) = handle.errors() {
        tokio::spawn(async move {
            while let Some(err) = errors.next().await {
                tracing::error!(error = %err, "outbox error");
            }
        });
    }
    if let Some(mut delivered) = handle.delivered() {
        tokio::spawn(async move {
            while let Some(d) = delivered.next().await {
                tracing::info!(event_id = %d.id, "event delivered");
            }
        });
    }

    for (sku, quantity) in [("book-001", 1), ("pen-042", 3), ("mug-007", 2)] {
        place_order(&outbox, sku, quantity).await?;
    }

    tracing::info!("press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    token.cancel();
    handle.join().await;

    Ok(())
}
