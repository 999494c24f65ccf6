//! SQLite-backed [`Store`].
//!
//! Timestamps are stored as Unix seconds. Pending alerts keep their
//! snapshot as JSON so the message can be rebuilt exactly as it was
//! deferred.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use newsbell_core::models::{
    AlertLevelState, IndexSnapshot, Item, PendingAlert, SubscriberId, Subscription,
};
use newsbell_core::quiet::QuietWindow;
use newsbell_core::store::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

#[async_trait]
impl Store for SqliteStore {
    async fn add_subscription(&self, subscriber: SubscriberId, expression: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO subscriptions (subscriber, expression, created_at) VALUES (?, ?, ?)",
        )
        .bind(subscriber)
        .bind(expression)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_subscription(
        &self,
        subscriber: SubscriberId,
        expression: &str,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE subscriber = ? AND expression = ?")
            .bind(subscriber)
            .bind(expression)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_all_subscriptions(&self, subscriber: SubscriberId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE subscriber = ?")
            .bind(subscriber)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn subscriptions_for(&self, subscriber: SubscriberId) -> Result<Vec<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT expression FROM subscriptions WHERE subscriber = ? ORDER BY id")
                .bind(subscriber)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn all_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query("SELECT subscriber, expression FROM subscriptions ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| Subscription::new(row.get::<i64, _>("subscriber"), row.get::<String, _>("expression")))
            .collect())
    }

    async fn is_delivered(
        &self,
        subscriber: SubscriberId,
        expression: &str,
        item_id: &str,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM deliveries WHERE subscriber = ? AND expression = ? AND item_id = ?",
        )
        .bind(subscriber)
        .bind(expression)
        .bind(item_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn record_deliveries(
        &self,
        subscriber: SubscriberId,
        expression: &str,
        items: &[Item],
        delivered_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO deliveries (subscriber, expression, item_id, title, delivered_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(subscriber)
            .bind(expression)
            .bind(&item.id)
            .bind(&item.title)
            .bind(delivered_at.timestamp())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn prune_deliveries(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM deliveries WHERE delivered_at < ?")
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn quiet_window(&self, subscriber: SubscriberId) -> Result<Option<QuietWindow>> {
        let row = sqlx::query(
            "SELECT start_minute, end_minute, enabled FROM quiet_windows WHERE subscriber = ?",
        )
        .bind(subscriber)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| QuietWindow {
            start_minute: r.get::<i64, _>("start_minute") as u16,
            end_minute: r.get::<i64, _>("end_minute") as u16,
            enabled: r.get::<bool, _>("enabled"),
        }))
    }

    async fn set_quiet_window(&self, subscriber: SubscriberId, window: QuietWindow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quiet_windows (subscriber, start_minute, end_minute, enabled)
            VALUES (?, ?, ?, 1)
            ON CONFLICT(subscriber) DO UPDATE SET
                start_minute = excluded.start_minute,
                end_minute = excluded.end_minute,
                enabled = 1
            "#,
        )
        .bind(subscriber)
        .bind(window.start_minute as i64)
        .bind(window.end_minute as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_quiet_enabled(&self, subscriber: SubscriberId, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE quiet_windows SET enabled = ? WHERE subscriber = ?")
            .bind(enabled)
            .bind(subscriber)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn alert_state(&self, subscriber: SubscriberId) -> Result<Option<AlertLevelState>> {
        let row = sqlx::query(
            "SELECT reference_peak, peak_date, last_level FROM alert_states WHERE subscriber = ?",
        )
        .bind(subscriber)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| AlertLevelState {
            reference_peak: r.get("reference_peak"),
            peak_date: r.get("peak_date"),
            last_level: r.get::<i64, _>("last_level") as u32,
        }))
    }

    async fn put_alert_state(
        &self,
        subscriber: SubscriberId,
        state: &AlertLevelState,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_states (subscriber, reference_peak, peak_date, last_level, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(subscriber) DO UPDATE SET
                reference_peak = excluded.reference_peak,
                peak_date = excluded.peak_date,
                last_level = excluded.last_level,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(subscriber)
        .bind(state.reference_peak)
        .bind(&state.peak_date)
        .bind(state.last_level as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_alert(&self, subscriber: SubscriberId) -> Result<Option<PendingAlert>> {
        let row = sqlx::query(
            "SELECT level, snapshot_json, created_at FROM pending_alerts WHERE subscriber = ?",
        )
        .bind(subscriber)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let json: String = row.get("snapshot_json");
        let snapshot: IndexSnapshot = serde_json::from_str(&json)
            .with_context(|| format!("corrupt pending alert for subscriber {}", subscriber))?;
        Ok(Some(PendingAlert {
            level: row.get::<i64, _>("level") as u32,
            snapshot,
            created_at: from_ts(row.get("created_at")),
        }))
    }

    async fn put_pending_alert(
        &self,
        subscriber: SubscriberId,
        alert: &PendingAlert,
    ) -> Result<()> {
        let json = serde_json::to_string(&alert.snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO pending_alerts (subscriber, level, snapshot_json, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(subscriber) DO UPDATE SET
                level = excluded.level,
                snapshot_json = excluded.snapshot_json,
                created_at = excluded.created_at
            "#,
        )
        .bind(subscriber)
        .bind(alert.level as i64)
        .bind(json)
        .bind(alert.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_pending_alert(&self, subscriber: SubscriberId) -> Result<()> {
        sqlx::query("DELETE FROM pending_alerts WHERE subscriber = ?")
            .bind(subscriber)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_blocked(&self, subscriber: SubscriberId) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO blocked_subscribers (subscriber, blocked_at) VALUES (?, ?)")
            .bind(subscriber)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_blocked(&self, subscriber: SubscriberId) -> Result<()> {
        sqlx::query("DELETE FROM blocked_subscribers WHERE subscriber = ?")
            .bind(subscriber)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_blocked(&self, subscriber: SubscriberId) -> Result<bool> {
        let blocked: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM blocked_subscribers WHERE subscriber = ?")
                .bind(subscriber)
                .fetch_one(&self.pool)
                .await?;
        Ok(blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        // One connection so every query sees the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::apply(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    #[tokio::test]
    async fn test_subscriptions_keep_registration_order() {
        let s = store().await;
        assert!(s.add_subscription(1, "b").await.unwrap());
        assert!(s.add_subscription(1, "a").await.unwrap());
        assert!(!s.add_subscription(1, "a").await.unwrap());
        assert_eq!(s.subscriptions_for(1).await.unwrap(), vec!["b", "a"]);
        assert_eq!(s.all_subscriptions().await.unwrap().len(), 2);
        assert_eq!(s.remove_all_subscriptions(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_deliveries_and_prune() {
        let s = store().await;
        let now = Utc::now();
        let a = Item::new("https://x/a", "A", "X", now);
        let b = Item::new("https://x/b", "B", "X", now);
        s.record_deliveries(1, "e", &[a.clone()], now - Duration::days(40))
            .await
            .unwrap();
        s.record_deliveries(1, "e", &[a, b], now).await.unwrap();
        assert!(s.is_delivered(1, "e", "https://x/a").await.unwrap());
        assert!(!s.is_delivered(2, "e", "https://x/a").await.unwrap());
        // The older record for `a` is kept as-is, so it is the one pruned.
        assert_eq!(s.prune_deliveries(now - Duration::days(30)).await.unwrap(), 1);
        assert!(s.is_delivered(1, "e", "https://x/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_quiet_and_alert_state_roundtrip() {
        let s = store().await;
        let w = QuietWindow::parse("23:00", "07:00").unwrap();
        s.set_quiet_window(3, w).await.unwrap();
        assert!(s.set_quiet_enabled(3, false).await.unwrap());
        let got = s.quiet_window(3).await.unwrap().unwrap();
        assert_eq!((got.start_minute, got.end_minute, got.enabled), (1380, 420, false));

        let state = AlertLevelState {
            reference_peak: 21000.5,
            peak_date: "2025-02-19".into(),
            last_level: 7,
        };
        s.put_alert_state(3, &state).await.unwrap();
        assert_eq!(s.alert_state(3).await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_pending_alert_overwrites() {
        let s = store().await;
        let snap = IndexSnapshot {
            symbol: "^NDX".into(),
            current: 19000.0,
            peak: 20000.0,
            peak_date: "2025-02-19".into(),
            percent_of_peak: 95.0,
            drop_pct: 5.0,
        };
        let created_at = DateTime::from_timestamp(1_760_000_000, 0).unwrap();
        for level in [5, 6] {
            let alert = PendingAlert {
                level,
                snapshot: snap.clone(),
                created_at,
            };
            s.put_pending_alert(4, &alert).await.unwrap();
        }
        let pending = s.pending_alert(4).await.unwrap().unwrap();
        assert_eq!(pending.level, 6);
        assert_eq!(pending.snapshot, snap);
        assert_eq!(pending.created_at, created_at);
        s.clear_pending_alert(4).await.unwrap();
        assert!(s.pending_alert(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blocked_flag() {
        let s = store().await;
        s.mark_blocked(8).await.unwrap();
        s.mark_blocked(8).await.unwrap();
        assert!(s.is_blocked(8).await.unwrap());
        s.clear_blocked(8).await.unwrap();
        assert!(!s.is_blocked(8).await.unwrap());
    }
}
