//! Threshold alert cycle.
//!
//! Runs at the configured local times. The index history is fetched once
//! per run and every subscriber is evaluated against the same snapshot:
//!
//! 1. Blocked subscribers are skipped.
//! 2. Outside quiet hours, a deferred alert is flushed first.
//! 3. [`decide`] picks skip, send, or defer. A send persists the new level
//!    only after the dispatcher confirms delivery; a defer overwrites the
//!    subscriber's pending alert.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use tracing::{debug, info, warn};

use newsbell_core::alert::{decide, leveraged_scenarios, should_alert, AlertDecision, Scenario};
use newsbell_core::models::{AlertLevelState, IndexSnapshot, PendingAlert, SubscriberId};

use crate::engine::Engine;
use crate::format::{self, Leveraged};
use crate::news_cycle::in_quiet_hours;

/// Range used to read the leveraged companion's latest close.
const LEVERAGED_RANGE: &str = "5d";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertReport {
    pub drop_pct: f64,
    pub level: u32,
    pub subscribers: usize,
    pub sent: usize,
    pub deferred: usize,
    pub flushed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Current index snapshot, or `None` when the provider returned no bars.
pub async fn index_snapshot(engine: &Engine) -> Result<Option<IndexSnapshot>> {
    let alerts = &engine.config.alerts;
    let bars = engine
        .quotes
        .history(&alerts.symbol, &alerts.range)
        .await
        .with_context(|| format!("failed to fetch history for {}", alerts.symbol))?;
    Ok(IndexSnapshot::from_series(&alerts.symbol, &bars))
}

/// Latest close of the leveraged companion. Failures only drop the
/// projection section from messages.
async fn leveraged_current(engine: &Engine) -> Option<f64> {
    let symbol = &engine.config.alerts.leveraged_symbol;
    if symbol.is_empty() {
        return None;
    }
    match engine.quotes.history(symbol, LEVERAGED_RANGE).await {
        Ok(bars) => bars.last().map(|b| b.close),
        Err(e) => {
            warn!(symbol = %symbol, error = %e, "leveraged quote unavailable");
            None
        }
    }
}

fn scenarios_for(snapshot: &IndexSnapshot, leveraged: Option<f64>) -> Vec<Scenario> {
    match leveraged {
        Some(price) => leveraged_scenarios(snapshot.current, snapshot.peak, price),
        None => Vec::new(),
    }
}

fn alert_text(
    engine: &Engine,
    level: u32,
    snapshot: &IndexSnapshot,
    leveraged: Option<f64>,
) -> String {
    let scenarios = scenarios_for(snapshot, leveraged);
    let lev = leveraged.map(|current| Leveraged {
        symbol: &engine.config.alerts.leveraged_symbol,
        current,
        scenarios: &scenarios,
    });
    format::drop_alert(level, snapshot, lev.as_ref())
}

/// Rendered on-demand index report.
pub async fn report(engine: &Engine) -> Result<String> {
    let Some(snapshot) = index_snapshot(engine).await? else {
        anyhow::bail!("no price history for {}", engine.config.alerts.symbol);
    };
    let leveraged = leveraged_current(engine).await;
    let scenarios = scenarios_for(&snapshot, leveraged);
    let lev = leveraged.map(|current| Leveraged {
        symbol: &engine.config.alerts.leveraged_symbol,
        current,
        scenarios: &scenarios,
    });
    Ok(format::index_report(
        &snapshot,
        lev.as_ref(),
        engine.clock.now(),
        engine.offset(),
    ))
}

async fn subscribers(engine: &Engine) -> Result<Vec<SubscriberId>> {
    let ids: BTreeSet<SubscriberId> = engine
        .store
        .all_subscriptions()
        .await?
        .into_iter()
        .map(|s| s.subscriber)
        .collect();
    Ok(ids.into_iter().collect())
}

async fn flush_with(
    engine: &Engine,
    subscriber: SubscriberId,
    leveraged: Option<f64>,
) -> Result<bool> {
    let store = engine.store.as_ref();
    let Some(pending) = store.pending_alert(subscriber).await? else {
        return Ok(false);
    };

    let state = store.alert_state(subscriber).await?;
    if !should_alert(
        pending.level,
        pending.snapshot.peak,
        state.as_ref(),
        engine.config.alerts.min_level,
    ) {
        debug!(subscriber, level = pending.level, "pending alert superseded");
        store.clear_pending_alert(subscriber).await?;
        return Ok(false);
    }

    let text = alert_text(engine, pending.level, &pending.snapshot, leveraged);
    let outcome = engine.dispatcher.send(subscriber, &text).await;
    if !outcome.delivered() {
        warn!(subscriber, level = pending.level, "pending alert not delivered, keeping it");
        return Ok(false);
    }
    store
        .put_alert_state(
            subscriber,
            &AlertLevelState::announced(&pending.snapshot, pending.level),
        )
        .await?;
    store.clear_pending_alert(subscriber).await?;
    info!(subscriber, level = pending.level, "pending alert flushed");
    Ok(true)
}

/// Deliver `subscriber`'s deferred alert now, regardless of quiet hours.
///
/// Used when the subscriber turns quiet hours off. Returns whether an
/// alert was delivered.
pub async fn flush_pending(engine: &Engine, subscriber: SubscriberId) -> Result<bool> {
    let leveraged = leveraged_current(engine).await;
    flush_with(engine, subscriber, leveraged).await
}

/// Flush every deferred alert whose subscriber is no longer in quiet hours.
pub async fn flush_due(engine: &Engine) -> Result<usize> {
    let local = engine.local_now();
    let mut leveraged: Option<Option<f64>> = None;
    let mut flushed = 0;
    for subscriber in subscribers(engine).await? {
        let store = engine.store.as_ref();
        if store.pending_alert(subscriber).await?.is_none()
            || store.is_blocked(subscriber).await?
            || in_quiet_hours(store, subscriber, local).await?
        {
            continue;
        }
        if leveraged.is_none() {
            leveraged = Some(leveraged_current(engine).await);
        }
        if flush_with(engine, subscriber, leveraged.flatten()).await? {
            flushed += 1;
        }
    }
    Ok(flushed)
}

enum Outcome {
    Skipped,
    Deferred,
    Sent,
    Failed,
}

/// One subscriber's turn in the cycle. The flag reports a flushed pending alert.
async fn evaluate(
    engine: &Engine,
    subscriber: SubscriberId,
    snapshot: &IndexSnapshot,
    leveraged: Option<f64>,
    local: DateTime<FixedOffset>,
) -> Result<(bool, Outcome)> {
    let store = engine.store.as_ref();
    if store.is_blocked(subscriber).await? {
        return Ok((false, Outcome::Skipped));
    }
    let quiet = in_quiet_hours(store, subscriber, local).await?;
    let flushed = !quiet && flush_with(engine, subscriber, leveraged).await?;

    let state = store.alert_state(subscriber).await?;
    let outcome = match decide(snapshot, state.as_ref(), quiet, engine.config.alerts.min_level) {
        AlertDecision::Skip => Outcome::Skipped,
        AlertDecision::Defer { level } => {
            let pending = PendingAlert {
                level,
                snapshot: snapshot.clone(),
                created_at: engine.clock.now(),
            };
            store.put_pending_alert(subscriber, &pending).await?;
            info!(subscriber, level, "quiet hours, alert deferred");
            Outcome::Deferred
        }
        AlertDecision::Send { level } => {
            let text = alert_text(engine, level, snapshot, leveraged);
            if engine.dispatcher.send(subscriber, &text).await.delivered() {
                store
                    .put_alert_state(subscriber, &AlertLevelState::announced(snapshot, level))
                    .await?;
                info!(subscriber, level, "drop alert sent");
                Outcome::Sent
            } else {
                Outcome::Failed
            }
        }
    };
    Ok((flushed, outcome))
}

/// Evaluate the index once and notify every subscriber.
pub async fn run_alert_cycle(engine: &Engine) -> Result<AlertReport> {
    let Some(snapshot) = index_snapshot(engine).await? else {
        warn!(symbol = %engine.config.alerts.symbol, "no price history, skipping alert cycle");
        return Ok(AlertReport::default());
    };
    let leveraged = leveraged_current(engine).await;

    let mut report = AlertReport {
        drop_pct: snapshot.drop_pct,
        level: snapshot.level(),
        ..AlertReport::default()
    };
    info!(
        symbol = %snapshot.symbol,
        current = snapshot.current,
        peak = snapshot.peak,
        drop_pct = snapshot.drop_pct,
        "index snapshot"
    );

    let subscribers = subscribers(engine).await?;
    report.subscribers = subscribers.len();
    let local = engine.local_now();

    for subscriber in subscribers {
        match evaluate(engine, subscriber, &snapshot, leveraged, local).await {
            Ok((flushed, outcome)) => {
                report.flushed += flushed as usize;
                match outcome {
                    Outcome::Skipped => report.skipped += 1,
                    Outcome::Deferred => report.deferred += 1,
                    Outcome::Sent => report.sent += 1,
                    Outcome::Failed => report.failed += 1,
                }
            }
            Err(e) => {
                warn!(subscriber, error = %e, "alert evaluation failed");
                report.failed += 1;
            }
        }
    }

    info!(
        level = report.level,
        sent = report.sent,
        deferred = report.deferred,
        flushed = report.flushed,
        "alert cycle complete"
    );
    Ok(report)
}
