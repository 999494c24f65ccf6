//! In-memory [`Store`] implementation for testing and simulations.
//!
//! Uses `HashMap`/`Vec` behind `std::sync::RwLock` for thread safety.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AlertLevelState, Item, PendingAlert, SubscriberId, Subscription};
use crate::quiet::QuietWindow;

use super::Store;

type DeliveryKey = (SubscriberId, String, String);

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    subscriptions: RwLock<Vec<Subscription>>,
    deliveries: RwLock<HashMap<DeliveryKey, DateTime<Utc>>>,
    quiet: RwLock<HashMap<SubscriberId, QuietWindow>>,
    alert_states: RwLock<HashMap<SubscriberId, AlertLevelState>>,
    pending: RwLock<HashMap<SubscriberId, PendingAlert>>,
    blocked: RwLock<HashSet<SubscriberId>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delivery records held.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.read().unwrap().len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn add_subscription(&self, subscriber: SubscriberId, expression: &str) -> Result<bool> {
        let mut subs = self.subscriptions.write().unwrap();
        let candidate = Subscription::new(subscriber, expression);
        if subs.contains(&candidate) {
            return Ok(false);
        }
        subs.push(candidate);
        Ok(true)
    }

    async fn remove_subscription(
        &self,
        subscriber: SubscriberId,
        expression: &str,
    ) -> Result<bool> {
        let mut subs = self.subscriptions.write().unwrap();
        let before = subs.len();
        subs.retain(|s| !(s.subscriber == subscriber && s.expression == expression));
        Ok(subs.len() < before)
    }

    async fn remove_all_subscriptions(&self, subscriber: SubscriberId) -> Result<u64> {
        let mut subs = self.subscriptions.write().unwrap();
        let before = subs.len();
        subs.retain(|s| s.subscriber != subscriber);
        Ok((before - subs.len()) as u64)
    }

    async fn subscriptions_for(&self, subscriber: SubscriberId) -> Result<Vec<String>> {
        let subs = self.subscriptions.read().unwrap();
        Ok(subs
            .iter()
            .filter(|s| s.subscriber == subscriber)
            .map(|s| s.expression.clone())
            .collect())
    }

    async fn all_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.read().unwrap().clone())
    }

    async fn is_delivered(
        &self,
        subscriber: SubscriberId,
        expression: &str,
        item_id: &str,
    ) -> Result<bool> {
        let key = (subscriber, expression.to_string(), item_id.to_string());
        Ok(self.deliveries.read().unwrap().contains_key(&key))
    }

    async fn record_deliveries(
        &self,
        subscriber: SubscriberId,
        expression: &str,
        items: &[Item],
        delivered_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut deliveries = self.deliveries.write().unwrap();
        for item in items {
            deliveries
                .entry((subscriber, expression.to_string(), item.id.clone()))
                .or_insert(delivered_at);
        }
        Ok(())
    }

    async fn prune_deliveries(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut deliveries = self.deliveries.write().unwrap();
        let before = deliveries.len();
        deliveries.retain(|_, at| *at >= cutoff);
        Ok((before - deliveries.len()) as u64)
    }

    async fn quiet_window(&self, subscriber: SubscriberId) -> Result<Option<QuietWindow>> {
        Ok(self.quiet.read().unwrap().get(&subscriber).copied())
    }

    async fn set_quiet_window(&self, subscriber: SubscriberId, window: QuietWindow) -> Result<()> {
        let window = QuietWindow {
            enabled: true,
            ..window
        };
        self.quiet.write().unwrap().insert(subscriber, window);
        Ok(())
    }

    async fn set_quiet_enabled(&self, subscriber: SubscriberId, enabled: bool) -> Result<bool> {
        let mut quiet = self.quiet.write().unwrap();
        match quiet.get_mut(&subscriber) {
            Some(window) => {
                window.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn alert_state(&self, subscriber: SubscriberId) -> Result<Option<AlertLevelState>> {
        Ok(self.alert_states.read().unwrap().get(&subscriber).cloned())
    }

    async fn put_alert_state(
        &self,
        subscriber: SubscriberId,
        state: &AlertLevelState,
    ) -> Result<()> {
        self.alert_states
            .write()
            .unwrap()
            .insert(subscriber, state.clone());
        Ok(())
    }

    async fn pending_alert(&self, subscriber: SubscriberId) -> Result<Option<PendingAlert>> {
        Ok(self.pending.read().unwrap().get(&subscriber).cloned())
    }

    async fn put_pending_alert(
        &self,
        subscriber: SubscriberId,
        alert: &PendingAlert,
    ) -> Result<()> {
        self.pending.write().unwrap().insert(subscriber, alert.clone());
        Ok(())
    }

    async fn clear_pending_alert(&self, subscriber: SubscriberId) -> Result<()> {
        self.pending.write().unwrap().remove(&subscriber);
        Ok(())
    }

    async fn mark_blocked(&self, subscriber: SubscriberId) -> Result<()> {
        self.blocked.write().unwrap().insert(subscriber);
        Ok(())
    }

    async fn clear_blocked(&self, subscriber: SubscriberId) -> Result<()> {
        self.blocked.write().unwrap().remove(&subscriber);
        Ok(())
    }

    async fn is_blocked(&self, subscriber: SubscriberId) -> Result<bool> {
        Ok(self.blocked.read().unwrap().contains(&subscriber))
    }
}
