//! End-to-end cycle tests over the in-memory store and scripted
//! collaborators. No network, no real sleeps.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use newsbell::alert_cycle;
use newsbell::config::parse_config;
use newsbell::engine::Engine;
use newsbell::news_cycle;
use newsbell_core::clock::ManualClock;
use newsbell_core::models::{Item, QuoteBar, SubscriberId};
use newsbell_core::quiet::QuietWindow;
use newsbell_core::store::memory::InMemoryStore;
use newsbell_core::store::Store;
use newsbell_core::subscription;
use newsbell_core::traits::{QuoteProvider, SearchProvider, Transport, TransportError};

const SAMSUNG_TITLES: [&str; 8] = [
    "Samsung unveils foldable phone lineup",
    "Chip exports surge in third quarter",
    "Union talks stall at Pyeongtaek plant",
    "Battery unit signs deal with automaker",
    "Display division posts record margin",
    "Investors weigh dividend policy shift",
    "New foundry customer announced Tuesday",
    "Regulators examine memory pricing",
];

const APPLE_TITLES: [&str; 4] = [
    "Apple opens retail store in Seoul",
    "iPhone shipments slow across Europe",
    "Vision headset gets software update",
    "Services revenue beats expectations",
];

/// 12:00 KST.
fn noon_kst() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 18, 3, 0, 0).unwrap()
}

fn items(prefix: &str, titles: &[&str]) -> Vec<Item> {
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| {
            Item::new(
                format!("https://news.example.com/{}/{}", prefix, i),
                *title,
                "example",
                noon_kst() - chrono::Duration::minutes(i as i64 * 5),
            )
        })
        .collect()
}

struct FakeSearch {
    results: HashMap<String, Vec<Item>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeSearch {
    fn new() -> Self {
        Self {
            results: HashMap::new(),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with(mut self, query: &str, items: Vec<Item>) -> Self {
        self.results.insert(query.to_string(), items);
        self
    }

    fn failing(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &str {
        "fake"
    }

    async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<Item>> {
        self.calls.lock().unwrap().push(query.to_string());
        if self.failing.contains(query) {
            bail!("upstream timeout for {}", query);
        }
        Ok(self.results.get(query).cloned().unwrap_or_default())
    }
}

/// Records delivered messages; replays scripted failures first.
#[derive(Default)]
struct FakeTransport {
    failures: Mutex<VecDeque<TransportError>>,
    attempts: Mutex<usize>,
    sent: Mutex<Vec<(SubscriberId, String)>>,
}

impl FakeTransport {
    fn failing_with(errors: Vec<TransportError>) -> Self {
        Self {
            failures: Mutex::new(errors.into()),
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<(SubscriberId, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_message(
        &self,
        subscriber: SubscriberId,
        text: &str,
    ) -> Result<(), TransportError> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent
            .lock()
            .unwrap()
            .push((subscriber, text.to_string()));
        Ok(())
    }
}

/// Index history that tests can replace between cycles.
struct FakeQuotes {
    bars: Mutex<Vec<QuoteBar>>,
}

impl FakeQuotes {
    fn new(peak: f64, close: f64) -> Self {
        Self {
            bars: Mutex::new(series(peak, close)),
        }
    }

    fn set(&self, peak: f64, close: f64) {
        *self.bars.lock().unwrap() = series(peak, close);
    }
}

fn series(peak: f64, close: f64) -> Vec<QuoteBar> {
    let day = |d: u32| Utc.with_ymd_and_hms(2025, 10, d, 0, 0, 0).unwrap();
    vec![
        QuoteBar {
            timestamp: day(1),
            high: peak - 5.0,
            low: peak - 10.0,
            close: peak - 6.0,
        },
        QuoteBar {
            timestamp: day(2),
            high: peak,
            low: peak - 4.0,
            close: peak - 1.0,
        },
        QuoteBar {
            timestamp: day(3),
            high: close + 1.0,
            low: close - 1.0,
            close,
        },
    ]
}

#[async_trait]
impl QuoteProvider for FakeQuotes {
    async fn history(&self, symbol: &str, _range: &str) -> Result<Vec<QuoteBar>> {
        if symbol != "^NDX" {
            bail!("unknown symbol {}", symbol);
        }
        Ok(self.bars.lock().unwrap().clone())
    }
}

const TEST_CONFIG: &str = r#"
[db]
path = "/dev/null"

[news]
cycle_max_results = 10
max_results = 15
fetch_delay_ms = 0

[dispatch]
transport = "console"
success_delay_ms = 0

[alerts]
leveraged_symbol = ""
"#;

struct Harness {
    engine: Engine,
    store: Arc<InMemoryStore>,
    transport: Arc<FakeTransport>,
    clock: Arc<ManualClock>,
    quotes: Arc<FakeQuotes>,
}

/// Tracks how many searches are running at once.
#[derive(Default)]
struct ConcurrencySearch {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl SearchProvider for ConcurrencySearch {
    fn name(&self) -> &str {
        "concurrency"
    }

    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<Item>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

fn harness(search: FakeSearch, transport: FakeTransport) -> Harness {
    harness_with(TEST_CONFIG, Arc::new(search), transport)
}

fn harness_with(
    config: &str,
    search: Arc<dyn SearchProvider>,
    transport: FakeTransport,
) -> Harness {
    let config = parse_config(config).unwrap();
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(transport);
    let clock = Arc::new(ManualClock::new(noon_kst()));
    let quotes = Arc::new(FakeQuotes::new(100.0, 97.0));
    let engine = Engine::new(
        config,
        store.clone(),
        search,
        quotes.clone(),
        transport.clone(),
        clock.clone(),
    );
    Harness {
        engine,
        store,
        transport,
        clock,
        quotes,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// News cycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_or_expression_fills_cap_proportionally() {
    let search = FakeSearch::new()
        .with("삼성", items("samsung", &SAMSUNG_TITLES))
        .with("애플", items("apple", &APPLE_TITLES));
    let h = harness(search, FakeTransport::default());
    subscription::register(h.store.as_ref(), 1, "삼성 OR 애플")
        .await
        .unwrap();

    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.queries, 2);
    assert_eq!(report.fetched_items, 12);
    assert_eq!(report.messages_sent, 1);
    assert_eq!(report.items_delivered, 10);
    assert_eq!(h.store.delivery_count(), 10);

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 1);
    assert!(sent[0].1.contains("삼성 OR 애플"));
    // 7 + 3 split of the ten slots
    assert_eq!(sent[0].1.matches("news.example.com/samsung/").count(), 7);
    assert_eq!(sent[0].1.matches("news.example.com/apple/").count(), 3);

    // Same upstream results: nothing is delivered twice.
    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.messages_sent, 0);
    assert_eq!(h.store.delivery_count(), 10);
}

#[tokio::test]
async fn test_each_fetch_worker_pauses_after_its_query() {
    let search = FakeSearch::new()
        .with("삼성", items("samsung", &SAMSUNG_TITLES[..2]))
        .with("애플", items("apple", &APPLE_TITLES[..2]));
    let config = TEST_CONFIG.replace("fetch_delay_ms = 0", "fetch_delay_ms = 300");
    let h = harness_with(&config, Arc::new(search), FakeTransport::default());
    subscription::register(h.store.as_ref(), 1, "삼성 OR 애플")
        .await
        .unwrap();

    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.queries, 2);
    assert_eq!(report.messages_sent, 1);
    // One pause per query; sends add none with success_delay_ms = 0.
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_millis(300), Duration::from_millis(300)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_searches_bounded_by_fetch_workers() {
    let search = Arc::new(ConcurrencySearch::default());
    let config = TEST_CONFIG.replace("fetch_delay_ms = 0", "fetch_delay_ms = 0\nfetch_workers = 2");
    let h = harness_with(&config, search.clone(), FakeTransport::default());
    for term in ["삼성", "애플", "구글", "테슬라", "엔비디아", "반도체"] {
        subscription::register(h.store.as_ref(), 1, term).await.unwrap();
    }

    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.queries, 6);
    assert_eq!(search.calls.load(Ordering::SeqCst), 6);
    assert_eq!(search.peak.load(Ordering::SeqCst), 2);
    assert_eq!(search.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shared_terms_fetched_once() {
    let search = FakeSearch::new().with("삼성", items("samsung", &SAMSUNG_TITLES[..3]));
    let h = harness(search, FakeTransport::default());
    subscription::register(h.store.as_ref(), 1, "삼성").await.unwrap();
    subscription::register(h.store.as_ref(), 2, "삼성").await.unwrap();

    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.queries, 1);
    assert_eq!(report.subscribers, 2);
    assert_eq!(report.messages_sent, 2);
    assert_eq!(h.store.delivery_count(), 6);
}

#[tokio::test]
async fn test_transient_failures_retry_then_commit() {
    let search = FakeSearch::new().with("삼성", items("samsung", &SAMSUNG_TITLES[..2]));
    let transport = FakeTransport::failing_with(vec![
        TransportError::status(502, "Bad Gateway"),
        TransportError::network("connection reset"),
    ]);
    let h = harness(search, transport);
    subscription::register(h.store.as_ref(), 9, "삼성").await.unwrap();

    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.messages_sent, 1);
    assert_eq!(report.failed_sends, 0);
    assert_eq!(h.transport.attempts(), 3);
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );
    assert_eq!(h.store.delivery_count(), 2);
}

#[tokio::test]
async fn test_failed_send_leaves_items_unseen() {
    let search = FakeSearch::new().with("삼성", items("samsung", &SAMSUNG_TITLES[..2]));
    let transport = FakeTransport::failing_with(vec![TransportError::status(400, "Bad Request")]);
    let h = harness(search, transport);
    subscription::register(h.store.as_ref(), 9, "삼성").await.unwrap();

    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.failed_sends, 1);
    assert_eq!(h.store.delivery_count(), 0);

    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.items_delivered, 2);
}

#[tokio::test]
async fn test_permanent_failure_blocks_subscriber() {
    let search = FakeSearch::new().with("삼성", items("samsung", &SAMSUNG_TITLES[..2]));
    let transport = FakeTransport::failing_with(vec![TransportError::status(
        403,
        "Forbidden: bot was blocked by the user",
    )]);
    let h = harness(search, transport);
    subscription::register(h.store.as_ref(), 9, "삼성").await.unwrap();

    news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert!(h.store.is_blocked(9).await.unwrap());
    assert_eq!(h.transport.attempts(), 1);

    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.skipped_blocked, 1);
    assert_eq!(h.transport.attempts(), 1);
}

#[tokio::test]
async fn test_quiet_hours_skip_news_without_marking_seen() {
    let search = FakeSearch::new().with("삼성", items("samsung", &SAMSUNG_TITLES[..3]));
    let h = harness(search, FakeTransport::default());
    subscription::register(h.store.as_ref(), 3, "삼성").await.unwrap();
    h.store
        .set_quiet_window(3, QuietWindow::parse("11:00", "13:00").unwrap())
        .await
        .unwrap();

    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.skipped_quiet, 1);
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.store.delivery_count(), 0);

    h.store.set_quiet_enabled(3, false).await.unwrap();
    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.items_delivered, 3);
}

#[tokio::test]
async fn test_failed_term_does_not_abort_cycle() {
    let search = FakeSearch::new()
        .with("삼성", items("samsung", &SAMSUNG_TITLES[..2]))
        .failing("애플");
    let h = harness(search, FakeTransport::default());
    subscription::register(h.store.as_ref(), 1, "애플").await.unwrap();
    subscription::register(h.store.as_ref(), 2, "삼성").await.unwrap();

    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.failed_queries, 1);
    assert_eq!(report.messages_sent, 1);
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 2);
}

#[tokio::test]
async fn test_and_expression_uses_compound_queries() {
    let compound = items("compound", &["Samsung and Apple settle patent dispute"]);
    let search = FakeSearch::new()
        .with("삼성", items("samsung", &SAMSUNG_TITLES[..2]))
        .with("애플", items("apple", &APPLE_TITLES[..2]))
        .with("삼성 +애플", compound.clone());
    let h = harness(search, FakeTransport::default());
    subscription::register(h.store.as_ref(), 1, "삼성 AND 애플")
        .await
        .unwrap();

    let report = news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(report.queries, 4);
    assert_eq!(report.items_delivered, 1);
    assert!(h.transport.sent()[0].1.contains(&compound[0].id));
}

// ═══════════════════════════════════════════════════════════════════════
// Manual check
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_manual_check_reports_no_results() {
    let h = harness(FakeSearch::new(), FakeTransport::default());
    subscription::register(h.store.as_ref(), 4, "없는키워드")
        .await
        .unwrap();

    let report = news_cycle::run_manual_check(&h.engine, 4).await.unwrap();
    assert_eq!(report.empty_expressions, 1);
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("없는키워드"));
    assert!(sent[0].1.contains("찾을 수 없습니다"));
}

#[tokio::test]
async fn test_manual_check_without_subscriptions() {
    let h = harness(FakeSearch::new(), FakeTransport::default());
    news_cycle::run_manual_check(&h.engine, 4).await.unwrap();
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("등록된 키워드가 없습니다"));
}

#[tokio::test]
async fn test_manual_check_backfills_seen_items_in_quiet_hours() {
    let search = FakeSearch::new().with("삼성", items("samsung", &SAMSUNG_TITLES[..3]));
    let h = harness(search, FakeTransport::default());
    subscription::register(h.store.as_ref(), 5, "삼성").await.unwrap();
    news_cycle::run_news_cycle(&h.engine).await.unwrap();
    assert_eq!(h.store.delivery_count(), 3);

    h.store
        .set_quiet_window(5, QuietWindow::parse("00:00", "23:59").unwrap())
        .await
        .unwrap();
    let report = news_cycle::run_manual_check(&h.engine, 5).await.unwrap();
    assert_eq!(report.messages_sent, 1);
    assert_eq!(report.fresh_items, 0);
    assert_eq!(report.backfill_items, 3);
    assert_eq!(h.store.delivery_count(), 3);
}

// ═══════════════════════════════════════════════════════════════════════
// Threshold alerts
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_alert_sent_once_per_level() {
    let h = harness(FakeSearch::new(), FakeTransport::default());
    subscription::register(h.store.as_ref(), 1, "삼성").await.unwrap();

    // 3% down: below the first level
    let report = alert_cycle::run_alert_cycle(&h.engine).await.unwrap();
    assert_eq!(report.sent, 0);

    h.quotes.set(100.0, 94.5);
    let report = alert_cycle::run_alert_cycle(&h.engine).await.unwrap();
    assert_eq!(report.level, 5);
    assert_eq!(report.sent, 1);
    assert!(h.transport.sent()[0].1.contains("5% 하락"));

    let report = alert_cycle::run_alert_cycle(&h.engine).await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(report.skipped, 1);

    h.quotes.set(100.0, 92.0);
    let report = alert_cycle::run_alert_cycle(&h.engine).await.unwrap();
    assert_eq!(report.level, 8);
    assert_eq!(report.sent, 1);

    // A recovery to a shallower level on the same peak stays silent.
    h.quotes.set(100.0, 94.0);
    let report = alert_cycle::run_alert_cycle(&h.engine).await.unwrap();
    assert_eq!(report.sent, 0);

    // A new peak re-arms from the lowest level.
    h.quotes.set(120.0, 113.0);
    let report = alert_cycle::run_alert_cycle(&h.engine).await.unwrap();
    assert_eq!(report.level, 5);
    assert_eq!(report.sent, 1);
    assert_eq!(h.transport.sent().len(), 3);
}

#[tokio::test]
async fn test_alert_deferred_in_quiet_hours_then_flushed() {
    let h = harness(FakeSearch::new(), FakeTransport::default());
    subscription::register(h.store.as_ref(), 7, "삼성").await.unwrap();
    h.store
        .set_quiet_window(7, QuietWindow::parse("11:00", "13:00").unwrap())
        .await
        .unwrap();

    h.quotes.set(100.0, 94.5);
    let report = alert_cycle::run_alert_cycle(&h.engine).await.unwrap();
    assert_eq!(report.deferred, 1);
    assert!(h.transport.sent().is_empty());
    assert!(h.store.pending_alert(7).await.unwrap().is_some());

    // A deeper level while still quiet replaces the pending alert.
    h.quotes.set(100.0, 93.0);
    alert_cycle::run_alert_cycle(&h.engine).await.unwrap();
    assert_eq!(h.store.pending_alert(7).await.unwrap().unwrap().level, 7);

    // Still quiet: nothing flushed.
    assert_eq!(alert_cycle::flush_due(&h.engine).await.unwrap(), 0);

    // 14:00 KST
    h.clock.advance(Duration::from_secs(2 * 3600));
    assert_eq!(alert_cycle::flush_due(&h.engine).await.unwrap(), 1);
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("7% 하락"));
    assert!(h.store.pending_alert(7).await.unwrap().is_none());

    // The flushed level counts as announced.
    let report = alert_cycle::run_alert_cycle(&h.engine).await.unwrap();
    assert_eq!(report.sent, 0);
}

#[tokio::test]
async fn test_flush_pending_ignores_quiet_hours() {
    let h = harness(FakeSearch::new(), FakeTransport::default());
    subscription::register(h.store.as_ref(), 7, "삼성").await.unwrap();
    h.store
        .set_quiet_window(7, QuietWindow::parse("11:00", "13:00").unwrap())
        .await
        .unwrap();
    h.quotes.set(100.0, 94.5);
    alert_cycle::run_alert_cycle(&h.engine).await.unwrap();

    assert!(alert_cycle::flush_pending(&h.engine, 7).await.unwrap());
    assert_eq!(h.transport.sent().len(), 1);
    assert!(!alert_cycle::flush_pending(&h.engine, 7).await.unwrap());
}

#[tokio::test]
async fn test_report_renders_snapshot() {
    let h = harness(FakeSearch::new(), FakeTransport::default());
    h.quotes.set(100.0, 90.0);
    let text = alert_cycle::report(&h.engine).await.unwrap();
    assert!(text.contains("주가 리포트"));
    assert!(text.contains("^NDX"));
    assert!(text.contains("10.00%"));
}
