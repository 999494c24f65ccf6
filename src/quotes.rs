//! Price history for the threshold alert subsystem.
//!
//! [`YahooQuotes`] reads daily bars from the Yahoo Finance chart API.
//! [`RetryingQuotes`] repeats a failed or empty fetch up to
//! `yahoo.max_attempts` times, pausing `yahoo.retry_delay_ms` between
//! attempts. [`CachedQuotes`] wraps any [`QuoteProvider`] so that the alert cycle,
//! the `report` command and concurrent callers share one upstream fetch:
//!
//! - results are cached per `(symbol, range)` for `alerts.cache_secs`;
//! - upstream calls are spaced at least `alerts.min_fetch_interval_secs`
//!   apart;
//! - the cache lock is held across the fetch, so callers arriving while a
//!   fetch is in flight get its result instead of issuing their own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use newsbell_core::clock::Clock;
use newsbell_core::models::QuoteBar;
use newsbell_core::traits::QuoteProvider;

use crate::config::{AlertsConfig, YahooConfig};

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
}

pub struct YahooQuotes {
    client: reqwest::Client,
    endpoint: String,
}

impl YahooQuotes {
    pub fn new(config: &YahooConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("newsbell/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QuoteProvider for YahooQuotes {
    async fn history(&self, symbol: &str, range: &str) -> Result<Vec<QuoteBar>> {
        let url = format!("{}/{}", self.endpoint, symbol);
        let response = self
            .client
            .get(&url)
            .query(&[("range", range), ("interval", "1d")])
            .send()
            .await
            .with_context(|| format!("quote request failed for {}", symbol))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Yahoo chart API error {} for {}: {}", status, symbol, body);
        }

        let body: ChartResponse = response.json().await?;
        let bars = parse_chart(body)?;
        debug!(symbol, bars = bars.len(), "fetched quote history");
        Ok(bars)
    }
}

fn parse_chart(body: ChartResponse) -> Result<Vec<QuoteBar>> {
    if let Some(err) = body.chart.error {
        bail!("Yahoo chart API error: {}", err.description);
    }
    let Some(result) = body.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let Some(series) = result.indicators.quote.into_iter().next() else {
        return Ok(Vec::new());
    };

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let values = (
            series.high.get(i).copied().flatten(),
            series.low.get(i).copied().flatten(),
            series.close.get(i).copied().flatten(),
        );
        let (Some(high), Some(low), Some(close)) = values else {
            continue;
        };
        let Some(timestamp) = DateTime::<Utc>::from_timestamp(*ts, 0) else {
            continue;
        };
        bars.push(QuoteBar {
            timestamp,
            high,
            low,
            close,
        });
    }
    Ok(bars)
}

/// Retries another [`QuoteProvider`] with a fixed pause between attempts.
///
/// Yahoo occasionally answers with an empty series instead of an error;
/// that counts as a failed attempt too. The last error (or an
/// "empty series" error) is returned once attempts run out.
pub struct RetryingQuotes<P> {
    inner: P,
    max_attempts: u32,
    delay: Duration,
    clock: Arc<dyn Clock>,
}

impl<P: QuoteProvider> RetryingQuotes<P> {
    pub fn new(inner: P, max_attempts: u32, delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            delay,
            clock,
        }
    }

    pub fn from_config(inner: P, config: &YahooConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            inner,
            config.max_attempts,
            Duration::from_millis(config.retry_delay_ms),
            clock,
        )
    }
}

#[async_trait]
impl<P: QuoteProvider> QuoteProvider for RetryingQuotes<P> {
    async fn history(&self, symbol: &str, range: &str) -> Result<Vec<QuoteBar>> {
        let mut attempt = 1;
        loop {
            let err = match self.inner.history(symbol, range).await {
                Ok(bars) if !bars.is_empty() => return Ok(bars),
                Ok(_) => anyhow::anyhow!("empty quote series for {}", symbol),
                Err(e) => e,
            };
            if attempt >= self.max_attempts {
                return Err(err.context(format!(
                    "quote history for {} failed after {} attempts",
                    symbol, attempt
                )));
            }
            warn!(symbol, attempt, max = self.max_attempts, error = %err, "quote fetch failed, retrying");
            self.clock.sleep(self.delay).await;
            attempt += 1;
        }
    }
}

struct Entry {
    bars: Vec<QuoteBar>,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<(String, String), Entry>,
    last_upstream: Option<Instant>,
}

/// Caching, rate-limited wrapper around another [`QuoteProvider`].
pub struct CachedQuotes<P> {
    inner: P,
    ttl: Duration,
    min_interval: Duration,
    state: Mutex<CacheState>,
}

impl<P: QuoteProvider> CachedQuotes<P> {
    pub fn new(inner: P, ttl: Duration, min_interval: Duration) -> Self {
        Self {
            inner,
            ttl,
            min_interval,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn from_config(inner: P, config: &AlertsConfig) -> Self {
        Self::new(
            inner,
            Duration::from_secs(config.cache_secs),
            Duration::from_secs(config.min_fetch_interval_secs),
        )
    }
}

#[async_trait]
impl<P: QuoteProvider> QuoteProvider for CachedQuotes<P> {
    async fn history(&self, symbol: &str, range: &str) -> Result<Vec<QuoteBar>> {
        let key = (symbol.to_string(), range.to_string());
        let mut state = self.state.lock().await;

        if let Some(entry) = state.entries.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                debug!(symbol, "quote cache hit");
                return Ok(entry.bars.clone());
            }
        }

        if let Some(last) = state.last_upstream {
            let since = last.elapsed();
            if since < self.min_interval {
                tokio::time::sleep(self.min_interval - since).await;
            }
        }

        state.last_upstream = Some(Instant::now());
        let bars = self.inner.history(symbol, range).await?;
        state.entries.insert(
            key,
            Entry {
                bars: bars.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(bars)
    }
}
