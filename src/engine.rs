//! Wiring of collaborators shared by every cycle.
//!
//! An [`Engine`] bundles the store, the news and quote providers, the
//! dispatcher and the clock behind trait objects. [`Engine::from_config`]
//! builds the production set (SQLite, Naver, Yahoo, Telegram or console);
//! tests build one with [`Engine::new`] from fakes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use newsbell_core::clock::Clock;
use newsbell_core::cluster::{PreferredDomains, RepresentativeRanking};
use newsbell_core::dispatch::Dispatcher;
use newsbell_core::store::Store;
use newsbell_core::traits::{QuoteProvider, SearchProvider, Transport};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::naver::NaverSource;
use crate::quotes::{CachedQuotes, RetryingQuotes, YahooQuotes};
use crate::sqlite_store::SqliteStore;
use crate::transport::{ConsoleTransport, TelegramTransport};

/// Wall-clock time and tokio sleeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct Engine {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub search: Arc<dyn SearchProvider>,
    pub quotes: Arc<dyn QuoteProvider>,
    pub dispatcher: Arc<Dispatcher>,
    pub clock: Arc<dyn Clock>,
    pub ranking: Arc<dyn RepresentativeRanking>,
}

impl Engine {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        search: Arc<dyn SearchProvider>,
        quotes: Arc<dyn QuoteProvider>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            transport,
            store.clone(),
            clock.clone(),
            config.dispatch.retry_policy(),
            config.dispatch.success_delay(),
        ));
        let ranking: Arc<dyn RepresentativeRanking> = Arc::new(PreferredDomains::new(
            config.news.preferred_domains.iter().cloned(),
        ));
        Self {
            config,
            store,
            search,
            quotes,
            dispatcher,
            clock,
            ranking,
        }
    }

    /// Production wiring. Secrets come from the environment.
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));

        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let search: Arc<dyn SearchProvider> = Arc::new(NaverSource::from_env(&config.naver)?);
        let quotes: Arc<dyn QuoteProvider> = Arc::new(CachedQuotes::from_config(
            RetryingQuotes::from_config(YahooQuotes::new(&config.yahoo)?, &config.yahoo, clock.clone()),
            &config.alerts,
        ));
        let transport: Arc<dyn Transport> = match config.dispatch.transport.as_str() {
            "console" => Arc::new(ConsoleTransport),
            _ => Arc::new(TelegramTransport::from_env(&config.telegram)?),
        };

        Ok(Self::new(
            config,
            store,
            search,
            quotes,
            transport,
            clock,
        ))
    }

    /// Offset used for quiet hours, alert times and message timestamps.
    pub fn offset(&self) -> FixedOffset {
        self.config.quiet.offset()
    }

    pub fn local_now(&self) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(&self.offset())
    }
}
