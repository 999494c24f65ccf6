//! Keyword news cycle and on-demand checks.
//!
//! # Scheduled cycle
//!
//! ```text
//! prune ledger
//!   └─▶ FetchPlan over every subscription (distinct terms + compounds)
//!         └─▶ fetch concurrently (fetch_workers permits, fetch_delay after each)
//!               └─▶ ResultPool (clustered once per query)
//!                     └─▶ per subscriber, concurrently:
//!                           skip blocked / quiet
//!                           resolve ─▶ unseen only ─▶ dispatch ─▶ commit on success
//! ```
//!
//! A failed fetch contributes zero items; a failed send leaves its items
//! unseen for the next cycle. Neither aborts the cycle.
//!
//! # Manual check
//!
//! [`run_manual_check`] runs the same pipeline for one subscriber, ignoring
//! quiet hours, with the stricter manual clustering threshold. Thin batches
//! are padded with already-seen items, and an expression with no results
//! at all gets an explicit "no results" message.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use newsbell_core::clock::Clock;
use newsbell_core::dispatch::{DispatchOutcome, Dispatcher};
use newsbell_core::expression::Expression;
use newsbell_core::ledger;
use newsbell_core::models::{Item, SubscriberId, Subscription};
use newsbell_core::plan::{resolve, FetchPlan, ResultPool};
use newsbell_core::store::Store;
use newsbell_core::traits::SearchProvider;

use crate::engine::Engine;
use crate::format;

/// Summary of one scheduled news cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub subscriptions: usize,
    pub subscribers: usize,
    pub queries: usize,
    pub failed_queries: usize,
    pub fetched_items: usize,
    pub messages_sent: usize,
    pub items_delivered: usize,
    pub failed_sends: usize,
    pub skipped_quiet: usize,
    pub skipped_blocked: usize,
    pub pruned: u64,
}

#[derive(Debug, Default)]
struct SubscriberTally {
    messages_sent: usize,
    items_delivered: usize,
    failed_sends: usize,
    skipped_quiet: bool,
    skipped_blocked: bool,
}

/// Whether automatic delivery to `subscriber` is suppressed at `local`.
pub(crate) async fn in_quiet_hours(
    store: &dyn Store,
    subscriber: SubscriberId,
    local: DateTime<FixedOffset>,
) -> Result<bool> {
    Ok(store
        .quiet_window(subscriber)
        .await?
        .is_some_and(|w| w.is_active_at(local)))
}

/// Fetch every query once, bounded by `news.fetch_workers`, and pool the results.
///
/// Returns the pool and the number of queries that failed.
async fn fetch_pool(
    engine: &Engine,
    queries: Vec<String>,
    max_results: usize,
    threshold: f64,
) -> (ResultPool, usize) {
    let semaphore = Arc::new(Semaphore::new(engine.config.news.fetch_workers.max(1)));
    let delay = Duration::from_millis(engine.config.news.fetch_delay_ms);
    let mut tasks = JoinSet::new();

    for query in queries {
        let search: Arc<dyn SearchProvider> = engine.search.clone();
        let clock: Arc<dyn Clock> = engine.clock.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (query, Err(anyhow!("fetch semaphore closed")));
            };
            let result = search.search(&query, max_results).await;
            if !delay.is_zero() {
                clock.sleep(delay).await;
            }
            (query, result)
        });
    }

    let mut pool = ResultPool::new(threshold, engine.ranking.clone());
    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((query, Ok(items))) => {
                debug!(query = %query, items = items.len(), "fetched");
                pool.insert(query, items);
            }
            Ok((query, Err(e))) => {
                warn!(query = %query, error = %e, "fetch failed, treating as empty");
                failed += 1;
            }
            Err(e) => {
                warn!(error = %e, "fetch task panicked");
                failed += 1;
            }
        }
    }
    (pool, failed)
}

/// Collaborators needed to deliver to one subscriber, owned so the work
/// can run on its own task.
struct Delivery {
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    cap: usize,
}

/// What one [`Delivery::deliver`] call sent.
struct Sent {
    outcome: DispatchOutcome,
    fresh: usize,
    backfill: usize,
}

impl Delivery {
    /// Send one expression's batch and commit it on success.
    async fn deliver(
        &self,
        subscriber: SubscriberId,
        expression: &str,
        items: &[Item],
        backfill: bool,
    ) -> Result<Option<Sent>> {
        let batch = ledger::select_batch(
            self.store.as_ref(),
            subscriber,
            expression,
            items,
            self.cap,
            backfill,
        )
        .await?;
        if batch.is_empty() {
            return Ok(None);
        }

        let text = format::news_batch(expression, &batch, self.clock.now(), self.offset);
        let outcome = self.dispatcher.send(subscriber, &text).await;
        if outcome.delivered() {
            ledger::commit(
                self.store.as_ref(),
                subscriber,
                expression,
                &batch.fresh,
                self.clock.now(),
            )
            .await?;
        }
        Ok(Some(Sent {
            outcome,
            fresh: batch.fresh.len(),
            backfill: batch.backfill.len(),
        }))
    }

    async fn run_subscriber(
        &self,
        pool: &ResultPool,
        subscriber: SubscriberId,
        expressions: &[String],
    ) -> Result<SubscriberTally> {
        let mut tally = SubscriberTally::default();
        if self.store.is_blocked(subscriber).await? {
            debug!(subscriber, "subscriber blocked, skipping");
            tally.skipped_blocked = true;
            return Ok(tally);
        }
        let local = self.clock.now().with_timezone(&self.offset);
        if in_quiet_hours(self.store.as_ref(), subscriber, local).await? {
            info!(subscriber, "quiet hours, skipping news");
            tally.skipped_quiet = true;
            return Ok(tally);
        }

        for text in expressions {
            let expr = match Expression::parse(text) {
                Ok(expr) => expr,
                Err(e) => {
                    warn!(subscriber, expression = %text, error = %e, "invalid stored expression");
                    continue;
                }
            };
            let items = resolve(&expr, pool, self.cap);
            let Some(sent) = self.deliver(subscriber, text, &items, false).await? else {
                continue;
            };
            match sent.outcome {
                DispatchOutcome::Delivered { .. } => {
                    info!(subscriber, expression = %text, items = sent.fresh, "news delivered");
                    tally.messages_sent += 1;
                    tally.items_delivered += sent.fresh;
                }
                DispatchOutcome::Blocked { .. } => {
                    tally.failed_sends += 1;
                    break;
                }
                DispatchOutcome::Failed { .. } => tally.failed_sends += 1,
            }
        }
        Ok(tally)
    }
}

fn group_by_subscriber(
    subscriptions: &[Subscription],
) -> BTreeMap<SubscriberId, Vec<String>> {
    let mut grouped: BTreeMap<SubscriberId, Vec<String>> = BTreeMap::new();
    for sub in subscriptions {
        grouped
            .entry(sub.subscriber)
            .or_default()
            .push(sub.expression.clone());
    }
    grouped
}

/// Run one scheduled news cycle over every subscription.
pub async fn run_news_cycle(engine: &Engine) -> Result<CycleReport> {
    let mut report = CycleReport {
        pruned: ledger::prune(
            engine.store.as_ref(),
            engine.clock.now(),
            engine.config.ledger.retention_days,
        )
        .await?,
        ..CycleReport::default()
    };

    let subscriptions = engine.store.all_subscriptions().await?;
    report.subscriptions = subscriptions.len();
    if subscriptions.is_empty() {
        debug!("no subscriptions, nothing to fetch");
        return Ok(report);
    }

    let plan = FetchPlan::build(&subscriptions);
    report.queries = plan.len();
    let (pool, failed) = fetch_pool(
        engine,
        plan.queries(),
        engine.config.news.cycle_max_results,
        engine.config.news.cycle_similarity,
    )
    .await;
    report.failed_queries = failed;
    report.fetched_items = pool.item_count();
    let pool = Arc::new(pool);

    let delivery = Arc::new(Delivery {
        store: engine.store.clone(),
        dispatcher: engine.dispatcher.clone(),
        clock: engine.clock.clone(),
        offset: engine.offset(),
        cap: engine.config.news.cycle_max_results,
    });
    let grouped = group_by_subscriber(&subscriptions);
    report.subscribers = grouped.len();

    let semaphore = Arc::new(Semaphore::new(engine.config.news.subscriber_workers.max(1)));
    let mut tasks = JoinSet::new();
    for (subscriber, expressions) in grouped {
        let delivery = delivery.clone();
        let pool = pool.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (subscriber, Err(anyhow!("subscriber semaphore closed")));
            };
            let result = delivery
                .run_subscriber(&pool, subscriber, &expressions)
                .await;
            (subscriber, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(tally))) => {
                report.messages_sent += tally.messages_sent;
                report.items_delivered += tally.items_delivered;
                report.failed_sends += tally.failed_sends;
                report.skipped_quiet += tally.skipped_quiet as usize;
                report.skipped_blocked += tally.skipped_blocked as usize;
            }
            Ok((subscriber, Err(e))) => {
                warn!(subscriber, error = %e, "news delivery failed for subscriber");
            }
            Err(e) => warn!(error = %e, "subscriber task panicked"),
        }
    }

    info!(
        subscriptions = report.subscriptions,
        queries = report.queries,
        failed_queries = report.failed_queries,
        fetched = report.fetched_items,
        sent = report.messages_sent,
        delivered = report.items_delivered,
        "news cycle complete"
    );
    Ok(report)
}

/// Summary of one on-demand check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualReport {
    pub expressions: usize,
    pub messages_sent: usize,
    pub fresh_items: usize,
    pub backfill_items: usize,
    pub empty_expressions: usize,
}

/// Check every expression of `subscriber` now and reply with the results.
pub async fn run_manual_check(engine: &Engine, subscriber: SubscriberId) -> Result<ManualReport> {
    let mut report = ManualReport::default();
    let expressions = engine.store.subscriptions_for(subscriber).await?;
    if expressions.is_empty() {
        engine
            .dispatcher
            .send(subscriber, &format::no_subscriptions())
            .await;
        return Ok(report);
    }
    report.expressions = expressions.len();

    let cap = engine.config.news.max_results;
    let delivery = Delivery {
        store: engine.store.clone(),
        dispatcher: engine.dispatcher.clone(),
        clock: engine.clock.clone(),
        offset: engine.offset(),
        cap,
    };

    for text in &expressions {
        let expr = match Expression::parse(text) {
            Ok(expr) => expr,
            Err(e) => {
                warn!(subscriber, expression = %text, error = %e, "invalid stored expression");
                continue;
            }
        };
        let plan = FetchPlan::for_expression(&expr);
        let (pool, _) = fetch_pool(
            engine,
            plan.queries(),
            cap,
            engine.config.news.manual_similarity,
        )
        .await;
        let items = resolve(&expr, &pool, cap);

        if items.is_empty() {
            report.empty_expressions += 1;
            let outcome = engine
                .dispatcher
                .send(subscriber, &format::no_results(text))
                .await;
            if matches!(outcome, DispatchOutcome::Blocked { .. }) {
                break;
            }
            continue;
        }

        let Some(sent) = delivery.deliver(subscriber, text, &items, true).await? else {
            continue;
        };
        match sent.outcome {
            DispatchOutcome::Delivered { .. } => {
                report.messages_sent += 1;
                report.fresh_items += sent.fresh;
                report.backfill_items += sent.backfill;
            }
            DispatchOutcome::Blocked { .. } => break,
            DispatchOutcome::Failed { .. } => {}
        }
    }

    info!(
        subscriber,
        expressions = report.expressions,
        sent = report.messages_sent,
        fresh = report.fresh_items,
        "manual check complete"
    );
    Ok(report)
}
