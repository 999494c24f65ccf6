//! Database statistics overview.
//!
//! Summarizes subscriptions, the delivery ledger, quiet windows and alert
//! state. Used by `newsbell stats` to confirm that cycles are delivering
//! and that the ledger is being pruned.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-subscriber breakdown.
struct SubscriberStats {
    subscriber: i64,
    expressions: i64,
    deliveries: i64,
    last_delivery_ts: Option<i64>,
    blocked: bool,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let subscribers: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT subscriber) FROM subscriptions")
            .fetch_one(&pool)
            .await?;
    let subscriptions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
        .fetch_one(&pool)
        .await?;
    let deliveries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deliveries")
        .fetch_one(&pool)
        .await?;
    let oldest_delivery: Option<i64> =
        sqlx::query_scalar("SELECT MIN(delivered_at) FROM deliveries")
            .fetch_one(&pool)
            .await?;
    let quiet: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quiet_windows WHERE enabled = 1")
        .fetch_one(&pool)
        .await?;
    let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_alerts")
        .fetch_one(&pool)
        .await?;
    let blocked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocked_subscribers")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("newsbell: Database Stats");
    println!("========================");
    println!();
    println!("  Database:       {}", config.db.path.display());
    println!("  Size:           {}", format_bytes(db_size));
    println!();
    println!("  Subscribers:    {}", subscribers);
    println!("  Subscriptions:  {}", subscriptions);
    println!("  Deliveries:     {}", deliveries);
    if let Some(ts) = oldest_delivery {
        println!("  Oldest record:  {}", format_ts_relative(ts));
    }
    println!("  Quiet windows:  {}", quiet);
    println!("  Pending alerts: {}", pending);
    println!("  Blocked:        {}", blocked);

    let rows = sqlx::query(
        r#"
        SELECT
            s.subscriber,
            COUNT(DISTINCT s.expression) AS expressions,
            (SELECT COUNT(*) FROM deliveries d WHERE d.subscriber = s.subscriber) AS deliveries,
            (SELECT MAX(delivered_at) FROM deliveries d WHERE d.subscriber = s.subscriber) AS last_delivery,
            EXISTS (SELECT 1 FROM blocked_subscribers b WHERE b.subscriber = s.subscriber) AS blocked
        FROM subscriptions s
        GROUP BY s.subscriber
        ORDER BY deliveries DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let per_subscriber: Vec<SubscriberStats> = rows
        .iter()
        .map(|row| SubscriberStats {
            subscriber: row.get("subscriber"),
            expressions: row.get("expressions"),
            deliveries: row.get("deliveries"),
            last_delivery_ts: row.get("last_delivery"),
            blocked: row.get::<i64, _>("blocked") != 0,
        })
        .collect();

    if !per_subscriber.is_empty() {
        println!();
        println!("  By subscriber:");
        println!(
            "  {:<16} {:>6} {:>10}   {:<16} {}",
            "SUBSCRIBER", "EXPRS", "DELIVERED", "LAST DELIVERY", ""
        );
        println!("  {}", "-".repeat(64));

        for s in &per_subscriber {
            let last = match s.last_delivery_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<16} {:>6} {:>10}   {:<16} {}",
                s.subscriber,
                s.expressions,
                s.deliveries,
                last,
                if s.blocked { "blocked" } else { "" }
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
