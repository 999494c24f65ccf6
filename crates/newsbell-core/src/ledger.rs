//! Delivery ledger: at-most-once delivery per (subscriber, expression, item).
//!
//! A record is written only after the dispatcher confirms a send, and only
//! for the fresh items of that send. Manual checks may pad a thin batch with
//! already-delivered items ("backfill"); those are shown but never recorded
//! again.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{Item, SubscriberId};
use crate::store::Store;

/// Items selected for one delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Never delivered before under this expression; recorded on commit.
    pub fresh: Vec<Item>,
    /// Already delivered, shown again to fill the batch.
    pub backfill: Vec<Item>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.fresh.is_empty() && self.backfill.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fresh.len() + self.backfill.len()
    }
}

/// Items from `items` with no delivery record, in input order.
pub async fn filter_unseen(
    store: &dyn Store,
    subscriber: SubscriberId,
    expression: &str,
    items: &[Item],
) -> Result<Vec<Item>> {
    let mut unseen = Vec::new();
    for item in items {
        if !store.is_delivered(subscriber, expression, &item.id).await? {
            unseen.push(item.clone());
        }
    }
    Ok(unseen)
}

/// Pick up to `cap` items: unseen first, then (if `backfill`) seen items
/// most recent first.
pub async fn select_batch(
    store: &dyn Store,
    subscriber: SubscriberId,
    expression: &str,
    pool: &[Item],
    cap: usize,
    backfill: bool,
) -> Result<Batch> {
    let mut fresh = Vec::new();
    let mut seen = Vec::new();
    for item in pool {
        if store.is_delivered(subscriber, expression, &item.id).await? {
            seen.push(item.clone());
        } else {
            fresh.push(item.clone());
        }
    }
    fresh.truncate(cap);

    let mut batch = Batch {
        fresh,
        backfill: Vec::new(),
    };
    if backfill && batch.fresh.len() < cap {
        seen.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        seen.truncate(cap - batch.fresh.len());
        batch.backfill = seen;
    }

    debug!(
        subscriber,
        expression,
        fresh = batch.fresh.len(),
        backfill = batch.backfill.len(),
        "selected batch"
    );
    Ok(batch)
}

/// Record `items` as delivered. Call only after a confirmed send.
pub async fn commit(
    store: &dyn Store,
    subscriber: SubscriberId,
    expression: &str,
    items: &[Item],
    at: DateTime<Utc>,
) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    store
        .record_deliveries(subscriber, expression, items, at)
        .await
}

/// Drop records older than `retention_days` before `now`. `0` keeps everything.
pub async fn prune(store: &dyn Store, now: DateTime<Utc>, retention_days: u32) -> Result<u64> {
    if retention_days == 0 {
        return Ok(0);
    }
    let cutoff = now - chrono::Duration::days(retention_days as i64);
    let removed = store.prune_deliveries(cutoff).await?;
    if removed > 0 {
        debug!(removed, retention_days, "pruned delivery records");
    }
    Ok(removed)
}
