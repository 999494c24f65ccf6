//! Threshold alerts on an index drawdown.
//!
//! The tracked index is compared against its reference peak (highest high
//! over the lookback range). Every whole percent of drawdown from
//! [`MIN_LEVEL`] upward is a level; each level is announced at most once
//! per reference peak:
//!
//! ```text
//! normal ──drop ≥ 5%──▶ alerting(5) ──▶ alerting(7) ──▶ alerting(12) …
//!    ▲                                                       │
//!    └──────────── new reference peak (re-arm) ◀─────────────┘
//! ```
//!
//! Levels only move up while the peak is unchanged. When the peak changes,
//! alerting restarts from the lowest qualifying level. A decision made
//! during quiet hours is deferred as a [`PendingAlert`](crate::models::PendingAlert)
//! instead of being sent.

use crate::models::{AlertLevelState, IndexSnapshot, QuoteBar};

/// Smallest drawdown level (in percent) that is ever announced.
pub const MIN_LEVEL: u32 = 5;

/// Drawdown levels and effective leverage for the companion ETF projection.
const LEVERAGE_MAP: [(u32, f64); 3] = [(20, 2.60), (30, 2.35), (40, 2.15)];

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn same_peak(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

impl IndexSnapshot {
    /// Summarize a daily series: current = last close, peak = highest high.
    ///
    /// Returns `None` for an empty series or a non-positive peak.
    pub fn from_series(symbol: &str, bars: &[QuoteBar]) -> Option<Self> {
        let last = bars.last()?;
        let mut peak_bar = &bars[0];
        for bar in bars {
            if bar.high > peak_bar.high {
                peak_bar = bar;
            }
        }
        if peak_bar.high <= 0.0 {
            return None;
        }

        let percent = last.close / peak_bar.high * 100.0;
        Some(Self {
            symbol: symbol.to_string(),
            current: round2(last.close),
            peak: round2(peak_bar.high),
            peak_date: peak_bar.timestamp.format("%Y-%m-%d").to_string(),
            percent_of_peak: round2(percent),
            drop_pct: round2(100.0 - percent),
        })
    }

    pub fn level(&self) -> u32 {
        alert_level(self.drop_pct)
    }
}

impl AlertLevelState {
    /// State recorded after `level` was announced for `snapshot`'s peak.
    pub fn announced(snapshot: &IndexSnapshot, level: u32) -> Self {
        Self {
            reference_peak: snapshot.peak,
            peak_date: snapshot.peak_date.clone(),
            last_level: level,
        }
    }
}

/// Whole-percent drawdown level: 5.0–5.99 → 5.
pub fn alert_level(drop_pct: f64) -> u32 {
    if drop_pct.is_finite() && drop_pct > 0.0 {
        drop_pct.floor() as u32
    } else {
        0
    }
}

/// Whether `level` against `peak` has not been announced yet.
pub fn should_alert(
    level: u32,
    peak: f64,
    state: Option<&AlertLevelState>,
    min_level: u32,
) -> bool {
    if level < min_level {
        return false;
    }
    match state {
        None => true,
        Some(s) if !same_peak(s.reference_peak, peak) => true,
        Some(s) => level > s.last_level,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// Nothing new to announce.
    Skip,
    /// Send now; persist the level only after a confirmed send.
    Send { level: u32 },
    /// Quiet hours: store as the subscriber's pending alert.
    Defer { level: u32 },
}

/// Decide what to do for one subscriber given the current snapshot.
pub fn decide(
    snapshot: &IndexSnapshot,
    state: Option<&AlertLevelState>,
    quiet_active: bool,
    min_level: u32,
) -> AlertDecision {
    let level = snapshot.level();
    if !should_alert(level, snapshot.peak, state, min_level) {
        return AlertDecision::Skip;
    }
    if quiet_active {
        AlertDecision::Defer { level }
    } else {
        AlertDecision::Send { level }
    }
}

/// Projected price of the leveraged companion at a given index drawdown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scenario {
    /// Index drawdown from the reference peak, in percent.
    pub drawdown_pct: u32,
    pub leverage: f64,
    pub price: f64,
}

/// Project the leveraged companion's price at 20/30/40 % index drawdowns.
///
/// The effective leverage shrinks with deeper drawdowns to account for
/// volatility decay. Prices never drop below 0.01.
pub fn leveraged_scenarios(
    index_current: f64,
    index_peak: f64,
    leveraged_current: f64,
) -> Vec<Scenario> {
    if index_current <= 0.0 {
        return Vec::new();
    }
    LEVERAGE_MAP
        .iter()
        .map(|&(drawdown_pct, leverage)| {
            let target = index_peak * (1.0 - drawdown_pct as f64 / 100.0);
            let index_change = (target - index_current) / index_current;
            let price = leveraged_current * (1.0 + index_change * leverage);
            Scenario {
                drawdown_pct,
                leverage,
                price: round2(price.max(0.01)),
            }
        })
        .collect()
}
