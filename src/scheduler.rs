//! Long-running daemon: the two periodic cycles.
//!
//! - News runs every `news.interval_minutes`. Missed ticks are skipped, so
//!   a slow cycle never causes a burst of catch-up runs and two news cycles
//!   never overlap. Each tick also flushes deferred alerts whose quiet
//!   window has closed.
//! - Alerts run at each local `alerts.times` entry.
//!
//! Both loops run until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Timelike};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use newsbell_core::quiet::parse_hhmm;

use crate::alert_cycle;
use crate::engine::Engine;
use crate::news_cycle;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Time from `now` until the next of `times` (minutes of day).
///
/// A time equal to the current minute counts as a full day away, so one
/// scheduled minute fires once.
pub fn next_alert_delay(now: DateTime<FixedOffset>, times: &[u16]) -> Option<Duration> {
    let elapsed_secs = (now.hour() * 60 + now.minute()) * 60 + now.second();
    times
        .iter()
        .map(|&t| {
            let target = t as u32 * 60;
            let mut wait = (target + MINUTES_PER_DAY * 60 - elapsed_secs) % (MINUTES_PER_DAY * 60);
            if wait == 0 {
                wait = MINUTES_PER_DAY * 60;
            }
            wait
        })
        .min()
        .map(|secs| Duration::from_secs(secs as u64))
}

async fn news_loop(engine: Arc<Engine>) {
    let period = Duration::from_secs(engine.config.news.interval_minutes.max(1) * 60);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        match news_cycle::run_news_cycle(&engine).await {
            Ok(report) => info!(
                sent = report.messages_sent,
                delivered = report.items_delivered,
                failed_queries = report.failed_queries,
                "scheduled news cycle"
            ),
            Err(e) => warn!(error = %e, "news cycle failed"),
        }
        match alert_cycle::flush_due(&engine).await {
            Ok(0) => {}
            Ok(n) => info!(flushed = n, "deferred alerts flushed"),
            Err(e) => warn!(error = %e, "flushing deferred alerts failed"),
        }
    }
}

async fn alert_loop(engine: Arc<Engine>, times: Vec<u16>) {
    loop {
        let Some(delay) = next_alert_delay(engine.local_now(), &times) else {
            return;
        };
        info!(in_secs = delay.as_secs(), "next alert check scheduled");
        tokio::time::sleep(delay).await;
        if let Err(e) = alert_cycle::run_alert_cycle(&engine).await {
            warn!(error = %e, "alert cycle failed");
        }
    }
}

/// Run both cycles until interrupted.
pub async fn run_daemon(engine: Arc<Engine>) -> Result<()> {
    let times = engine
        .config
        .alerts
        .times
        .iter()
        .map(|t| parse_hhmm(t))
        .collect::<Result<Vec<u16>, _>>()?;

    info!(
        interval_minutes = engine.config.news.interval_minutes,
        alert_times = ?engine.config.alerts.times,
        "daemon started"
    );

    let news = tokio::spawn(news_loop(engine.clone()));
    let alerts = tokio::spawn(alert_loop(engine.clone(), times));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    news.abort();
    alerts.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kst(h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 10, 18, h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_next_alert_delay_picks_soonest() {
        let times = [20 * 60, 22 * 60, 0];
        assert_eq!(
            next_alert_delay(kst(19, 30), &times),
            Some(Duration::from_secs(30 * 60))
        );
        assert_eq!(
            next_alert_delay(kst(23, 0), &times),
            Some(Duration::from_secs(60 * 60))
        );
    }

    #[test]
    fn test_next_alert_delay_same_minute_waits_a_day() {
        assert_eq!(
            next_alert_delay(kst(20, 0), &[20 * 60]),
            Some(Duration::from_secs(24 * 3600))
        );
    }

    #[test]
    fn test_no_times() {
        assert_eq!(next_alert_delay(kst(12, 0), &[]), None);
    }
}
