//! TOML configuration.
//!
//! Only `[db]` is required; every other section falls back to defaults.
//! Secrets (API keys, bot token) are never read from this file, only from
//! the environment.
//!
//! ```toml
//! [db]
//! path = "./data/newsbell.sqlite"
//!
//! [news]
//! max_results = 15
//! cycle_max_results = 10
//! preferred_domains = ["news.naver.com"]
//!
//! [alerts]
//! symbol = "^NDX"
//! times = ["20:00", "22:00", "00:00"]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use newsbell_core::quiet::parse_hhmm;
use newsbell_core::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub quiet: QuietConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub naver: NaverConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub yahoo: YahooConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsConfig {
    /// Output cap for on-demand checks.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Output cap for the scheduled cycle.
    #[serde(default = "default_cycle_max_results")]
    pub cycle_max_results: usize,
    #[serde(default = "default_cycle_similarity")]
    pub cycle_similarity: f64,
    #[serde(default = "default_manual_similarity")]
    pub manual_similarity: f64,
    /// Concurrent upstream searches per cycle.
    #[serde(default = "default_workers")]
    pub fetch_workers: usize,
    /// Pause held by each worker after a search.
    #[serde(default = "default_fetch_delay_ms")]
    pub fetch_delay_ms: u64,
    /// Concurrent subscriptions processed after the pool is filled.
    #[serde(default = "default_workers")]
    pub subscriber_workers: usize,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Domains whose items represent a cluster first, highest priority first.
    #[serde(default = "default_preferred_domains")]
    pub preferred_domains: Vec<String>,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            cycle_max_results: default_cycle_max_results(),
            cycle_similarity: default_cycle_similarity(),
            manual_similarity: default_manual_similarity(),
            fetch_workers: default_workers(),
            fetch_delay_ms: default_fetch_delay_ms(),
            subscriber_workers: default_workers(),
            interval_minutes: default_interval_minutes(),
            preferred_domains: default_preferred_domains(),
        }
    }
}

fn default_max_results() -> usize {
    15
}
fn default_cycle_max_results() -> usize {
    10
}
fn default_cycle_similarity() -> f64 {
    0.60
}
fn default_manual_similarity() -> f64 {
    0.75
}
fn default_workers() -> usize {
    4
}
fn default_fetch_delay_ms() -> u64 {
    300
}
fn default_interval_minutes() -> u64 {
    10
}
fn default_preferred_domains() -> Vec<String> {
    vec!["news.naver.com".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Delivery records older than this are pruned; `0` keeps them forever.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// `telegram` or `console`.
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_success_delay_ms")]
    pub success_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            success_delay_ms: default_success_delay_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            ..RetryPolicy::default()
        }
    }

    pub fn success_delay(&self) -> Duration {
        Duration::from_millis(self.success_delay_ms)
    }
}

fn default_transport() -> String {
    "telegram".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_success_delay_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuietConfig {
    /// Offset of the subscribers' wall clock from UTC.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl Default for QuietConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

impl QuietConfig {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

fn default_utc_offset_minutes() -> i32 {
    540
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Lookback range used to find the reference peak.
    #[serde(default = "default_range")]
    pub range: String,
    /// Leveraged companion shown in projections; empty disables them.
    #[serde(default = "default_leveraged_symbol")]
    pub leveraged_symbol: String,
    #[serde(default = "default_min_level")]
    pub min_level: u32,
    /// Local times (`HH:MM`) at which the alert cycle runs.
    #[serde(default = "default_times")]
    pub times: Vec<String>,
    #[serde(default = "default_cache_secs")]
    pub cache_secs: u64,
    #[serde(default = "default_min_fetch_interval_secs")]
    pub min_fetch_interval_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            range: default_range(),
            leveraged_symbol: default_leveraged_symbol(),
            min_level: default_min_level(),
            times: default_times(),
            cache_secs: default_cache_secs(),
            min_fetch_interval_secs: default_min_fetch_interval_secs(),
        }
    }
}

fn default_symbol() -> String {
    "^NDX".to_string()
}
fn default_range() -> String {
    "2y".to_string()
}
fn default_leveraged_symbol() -> String {
    "TQQQ".to_string()
}
fn default_min_level() -> u32 {
    newsbell_core::alert::MIN_LEVEL
}
fn default_times() -> Vec<String> {
    vec!["20:00".into(), "22:00".into(), "00:00".into()]
}
fn default_cache_secs() -> u64 {
    60
}
fn default_min_fetch_interval_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct NaverConfig {
    #[serde(default = "default_naver_endpoint")]
    pub endpoint: String,
    /// Items published longer ago than this are dropped.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Fetch the article page when the API cut a title short.
    #[serde(default = "default_fetch_full_titles")]
    pub fetch_full_titles: bool,
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
}

impl Default for NaverConfig {
    fn default() -> Self {
        Self {
            endpoint: default_naver_endpoint(),
            max_age_days: default_max_age_days(),
            timeout_secs: default_timeout_secs(),
            fetch_full_titles: default_fetch_full_titles(),
            page_timeout_secs: default_page_timeout_secs(),
        }
    }
}

fn default_naver_endpoint() -> String {
    "https://openapi.naver.com/v1/search/news.json".to_string()
}
fn default_max_age_days() -> i64 {
    30
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_fetch_full_titles() -> bool {
    true
}
fn default_page_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_telegram_api(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct YahooConfig {
    #[serde(default = "default_yahoo_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_yahoo_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per history request, including the first. Empty series
    /// count as failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_yahoo_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            endpoint: default_yahoo_endpoint(),
            timeout_secs: default_yahoo_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_yahoo_retry_delay_ms(),
        }
    }
}

fn default_yahoo_endpoint() -> String {
    "https://query1.finance.yahoo.com/v8/finance/chart".to_string()
}
fn default_yahoo_timeout_secs() -> u64 {
    30
}
fn default_yahoo_retry_delay_ms() -> u64 {
    2000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate news
    if config.news.max_results == 0 || config.news.cycle_max_results == 0 {
        anyhow::bail!("news.max_results and news.cycle_max_results must be >= 1");
    }
    for (key, value) in [
        ("news.cycle_similarity", config.news.cycle_similarity),
        ("news.manual_similarity", config.news.manual_similarity),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("{} must be in [0.0, 1.0]", key);
        }
    }
    if config.news.fetch_workers == 0 || config.news.subscriber_workers == 0 {
        anyhow::bail!("news.fetch_workers and news.subscriber_workers must be >= 1");
    }
    if config.news.interval_minutes == 0 {
        anyhow::bail!("news.interval_minutes must be >= 1");
    }

    // Validate dispatch
    if config.dispatch.max_attempts == 0 {
        anyhow::bail!("dispatch.max_attempts must be >= 1");
    }
    if config.dispatch.multiplier < 1.0 {
        anyhow::bail!("dispatch.multiplier must be >= 1.0");
    }
    match config.dispatch.transport.as_str() {
        "telegram" | "console" => {}
        other => anyhow::bail!(
            "Unknown dispatch transport: '{}'. Must be telegram or console.",
            other
        ),
    }

    // Validate quiet hours offset
    if FixedOffset::east_opt(config.quiet.utc_offset_minutes * 60).is_none() {
        anyhow::bail!("quiet.utc_offset_minutes must be within ±24h");
    }

    // Validate alerts
    if config.alerts.symbol.trim().is_empty() {
        anyhow::bail!("alerts.symbol must not be empty");
    }
    for time in &config.alerts.times {
        parse_hhmm(time).with_context(|| format!("alerts.times: invalid entry '{}'", time))?;
    }
    if config.yahoo.max_attempts == 0 {
        anyhow::bail!("yahoo.max_attempts must be >= 1");
    }

    Ok(config)
}
