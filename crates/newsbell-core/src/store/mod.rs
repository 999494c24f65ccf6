//! Storage abstraction for Newsbell.
//!
//! The [`Store`] trait is the only persistence contract the engine relies
//! on: key existence and inserts for the delivery ledger, and upserts for
//! per-subscriber state (quiet windows, pending alerts, alert levels,
//! blocked flags). Backends are pluggable; [`memory::InMemoryStore`] ships
//! here for tests and simulations, and the application provides a SQLite
//! implementation.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AlertLevelState, Item, PendingAlert, SubscriberId, Subscription};
use crate::quiet::QuietWindow;

/// Abstract storage backend.
///
/// # Operations
///
/// | Group | Methods |
/// |-------|---------|
/// | Subscriptions | [`add_subscription`](Store::add_subscription), [`remove_subscription`](Store::remove_subscription), [`remove_all_subscriptions`](Store::remove_all_subscriptions), [`subscriptions_for`](Store::subscriptions_for), [`all_subscriptions`](Store::all_subscriptions) |
/// | Delivery ledger | [`is_delivered`](Store::is_delivered), [`record_deliveries`](Store::record_deliveries), [`prune_deliveries`](Store::prune_deliveries) |
/// | Quiet windows | [`quiet_window`](Store::quiet_window), [`set_quiet_window`](Store::set_quiet_window), [`set_quiet_enabled`](Store::set_quiet_enabled) |
/// | Threshold alerts | [`alert_state`](Store::alert_state), [`put_alert_state`](Store::put_alert_state), [`pending_alert`](Store::pending_alert), [`put_pending_alert`](Store::put_pending_alert), [`clear_pending_alert`](Store::clear_pending_alert) |
/// | Reachability | [`mark_blocked`](Store::mark_blocked), [`clear_blocked`](Store::clear_blocked), [`is_blocked`](Store::is_blocked) |
#[async_trait]
pub trait Store: Send + Sync {
    /// Register an expression. Returns `false` if it already existed.
    async fn add_subscription(&self, subscriber: SubscriberId, expression: &str) -> Result<bool>;

    /// Remove one expression. Returns `false` if it did not exist.
    async fn remove_subscription(&self, subscriber: SubscriberId, expression: &str)
        -> Result<bool>;

    /// Remove every expression of a subscriber, returning how many were removed.
    async fn remove_all_subscriptions(&self, subscriber: SubscriberId) -> Result<u64>;

    /// Expressions of one subscriber in registration order.
    async fn subscriptions_for(&self, subscriber: SubscriberId) -> Result<Vec<String>>;

    /// Every registered (subscriber, expression) pair.
    async fn all_subscriptions(&self) -> Result<Vec<Subscription>>;

    /// Whether `item_id` was already delivered under this expression.
    async fn is_delivered(
        &self,
        subscriber: SubscriberId,
        expression: &str,
        item_id: &str,
    ) -> Result<bool>;

    /// Insert one delivery record per item, atomically.
    ///
    /// Existing records are left untouched.
    async fn record_deliveries(
        &self,
        subscriber: SubscriberId,
        expression: &str,
        items: &[Item],
        delivered_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete delivery records older than `cutoff`, returning how many were removed.
    async fn prune_deliveries(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn quiet_window(&self, subscriber: SubscriberId) -> Result<Option<QuietWindow>>;

    /// Upsert the window; setting a window always enables it.
    async fn set_quiet_window(&self, subscriber: SubscriberId, window: QuietWindow) -> Result<()>;

    /// Toggle an existing window. Returns `false` if none is configured.
    async fn set_quiet_enabled(&self, subscriber: SubscriberId, enabled: bool) -> Result<bool>;

    async fn alert_state(&self, subscriber: SubscriberId) -> Result<Option<AlertLevelState>>;

    async fn put_alert_state(&self, subscriber: SubscriberId, state: &AlertLevelState)
        -> Result<()>;

    async fn pending_alert(&self, subscriber: SubscriberId) -> Result<Option<PendingAlert>>;

    /// Store the deferred alert, overwriting any previous one.
    async fn put_pending_alert(&self, subscriber: SubscriberId, alert: &PendingAlert)
        -> Result<()>;

    async fn clear_pending_alert(&self, subscriber: SubscriberId) -> Result<()>;

    async fn mark_blocked(&self, subscriber: SubscriberId) -> Result<()>;

    async fn clear_blocked(&self, subscriber: SubscriberId) -> Result<()>;

    async fn is_blocked(&self, subscriber: SubscriberId) -> Result<bool>;
}
