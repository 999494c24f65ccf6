use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Registered expressions, kept in registration order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subscriber INTEGER NOT NULL,
            expression TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(subscriber, expression)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Delivery ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deliveries (
            subscriber INTEGER NOT NULL,
            expression TEXT NOT NULL,
            item_id TEXT NOT NULL,
            title TEXT NOT NULL,
            delivered_at INTEGER NOT NULL,
            PRIMARY KEY (subscriber, expression, item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quiet_windows (
            subscriber INTEGER PRIMARY KEY,
            start_minute INTEGER NOT NULL,
            end_minute INTEGER NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert_states (
            subscriber INTEGER PRIMARY KEY,
            reference_peak REAL NOT NULL,
            peak_date TEXT NOT NULL,
            last_level INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one deferred alert per subscriber
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_alerts (
            subscriber INTEGER PRIMARY KEY,
            level INTEGER NOT NULL,
            snapshot_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blocked_subscribers (
            subscriber INTEGER PRIMARY KEY,
            blocked_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_deliveries_delivered_at ON deliveries(delivered_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_subscriber ON subscriptions(subscriber)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
