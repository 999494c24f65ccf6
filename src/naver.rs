//! Naver news search provider.
//!
//! Calls `GET /v1/search/news.json` with the client id/secret headers.
//! Requests three times as many results as the caller wants (up to the
//! API maximum of 100) so clustering has material to work with, sorted by
//! relevance.
//!
//! Each returned item is cleaned up before it enters the pipeline:
//! - HTML tags and entities are removed from the title.
//! - Titles the API truncated (ending in `...` or `…`) are replaced with
//!   the article page's own title when `naver.fetch_full_titles` is on and
//!   the page can be read; otherwise the API title stays.
//! - The publisher is derived from the original article's domain.
//! - Items older than `naver.max_age_days` are dropped; items with an
//!   unparseable date are kept and stamped with the fetch time.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::USER_AGENT;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, warn};

use newsbell_core::models::{url_host, Item};
use newsbell_core::traits::SearchProvider;

use crate::config::NaverConfig;

/// Naver's per-request maximum for `display`.
const MAX_DISPLAY: usize = 100;

const UNKNOWN_PUBLISHER: &str = "알 수 없음";

/// Some publishers reject requests without a browser user agent.
const PAGE_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Headline selectors on Naver's own article pages, newest layout first.
const NAVER_TITLE_SELECTORS: &[&str] = &[
    "h2#title_area",
    "h3#articleTitle",
    "h2.media_end_head_headline",
];

/// Known publisher domains. Matched by substring against the host.
const PUBLISHERS: &[(&str, &str)] = &[
    ("yna.co.kr", "연합뉴스"),
    ("yonhapnews.co.kr", "연합뉴스"),
    ("biz.chosun.com", "조선비즈"),
    ("tvchosun.com", "TV조선"),
    ("chosun.com", "조선일보"),
    ("joongang.co.kr", "중앙일보"),
    ("donga.com", "동아일보"),
    ("hani.co.kr", "한겨레"),
    ("khan.co.kr", "경향신문"),
    ("kmib.co.kr", "국민일보"),
    ("segye.com", "세계일보"),
    ("munhwa.com", "문화일보"),
    ("seoul.co.kr", "서울신문"),
    ("hankookilbo.com", "한국일보"),
    ("mk.co.kr", "매일경제"),
    ("hankyung.com", "한국경제"),
    ("wowtv.co.kr", "한국경제TV"),
    ("mt.co.kr", "머니투데이"),
    ("edaily.co.kr", "이데일리"),
    ("etnews.com", "전자신문"),
    ("dt.co.kr", "디지털타임스"),
    ("news1.kr", "뉴스1"),
    ("newsis.com", "뉴시스"),
    ("newspim.com", "뉴스핌"),
    ("nocutnews.co.kr", "노컷뉴스"),
    ("kbs.co.kr", "KBS"),
    ("imbc.com", "MBC"),
    ("sbs.co.kr", "SBS"),
    ("jtbc.co.kr", "JTBC"),
    ("mbntv.co.kr", "MBN"),
    ("ytn.co.kr", "YTN"),
    ("sedaily.com", "서울경제"),
    ("fnnews.com", "파이낸셜뉴스"),
    ("heraldcorp.com", "헤럴드경제"),
    ("asiae.co.kr", "아시아경제"),
    ("etoday.co.kr", "이투데이"),
    ("busan.com", "부산일보"),
    ("kookje.co.kr", "국제신문"),
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    originallink: String,
    #[serde(default)]
    link: String,
    #[serde(default, rename = "pubDate")]
    pub_date: String,
}

pub struct NaverSource {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
    max_age_days: i64,
    fetch_full_titles: bool,
    page_timeout: Duration,
}

impl NaverSource {
    pub fn new(config: &NaverConfig, client_id: String, client_secret: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            client_id,
            client_secret,
            max_age_days: config.max_age_days,
            fetch_full_titles: config.fetch_full_titles,
            page_timeout: Duration::from_secs(config.page_timeout_secs),
        })
    }

    /// Build from `NAVER_CLIENT_ID` / `NAVER_CLIENT_SECRET`.
    pub fn from_env(config: &NaverConfig) -> Result<Self> {
        let id = std::env::var("NAVER_CLIENT_ID")
            .map_err(|_| anyhow::anyhow!("NAVER_CLIENT_ID not set"))?;
        let secret = std::env::var("NAVER_CLIENT_SECRET")
            .map_err(|_| anyhow::anyhow!("NAVER_CLIENT_SECRET not set"))?;
        Self::new(config, id, secret)
    }

    /// Read the headline from the article page itself. `None` on any failure.
    async fn full_title(&self, url: &str) -> Option<String> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, PAGE_USER_AGENT)
            .timeout(self.page_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        let body = match response {
            Ok(r) => r.text().await,
            Err(e) => Err(e),
        };
        match body {
            Ok(html) => page_title(&html, url),
            Err(e) => {
                debug!(url, error = %e, "article page unavailable, keeping API title");
                None
            }
        }
    }
}

#[async_trait]
impl SearchProvider for NaverSource {
    fn name(&self) -> &str {
        "naver"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Item>> {
        let display = (max_results.max(1) * 3).min(MAX_DISPLAY).to_string();

        let response = self
            .client
            .get(&self.endpoint)
            .header("X-Naver-Client-Id", &self.client_id)
            .header("X-Naver-Client-Secret", &self.client_secret)
            .query(&[
                ("query", query),
                ("display", display.as_str()),
                ("sort", "sim"),
            ])
            .send()
            .await
            .with_context(|| format!("naver request failed for '{}'", query))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Naver API error {}: {}", status, body);
        }

        let body: SearchResponse = response.json().await?;
        let mut items = parse_items(body.items, Utc::now(), self.max_age_days);

        if self.fetch_full_titles {
            for item in items.iter_mut().filter(|i| is_truncated(&i.title)) {
                match self.full_title(&item.id).await {
                    Some(full) => {
                        debug!(from = %item.title, to = %full, "restored truncated title");
                        item.title = full;
                    }
                    None => warn!(url = %item.id, "could not restore truncated title"),
                }
            }
        }

        debug!(query, fetched = items.len(), "naver search");
        Ok(items)
    }
}

fn parse_items(raw: Vec<RawItem>, now: DateTime<Utc>, max_age_days: i64) -> Vec<Item> {
    let cutoff = now - chrono::Duration::days(max_age_days);
    raw.into_iter()
        .filter_map(|r| {
            let title = clean_html(&r.title);
            let link = if r.link.is_empty() {
                r.originallink.clone()
            } else {
                r.link.clone()
            };
            if title.is_empty() || link.is_empty() {
                return None;
            }

            let published_at = match DateTime::parse_from_rfc2822(&r.pub_date) {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(_) => now,
            };
            if published_at < cutoff {
                debug!(title = %title, "dropping stale item");
                return None;
            }

            let publisher = publisher_for(&r.originallink);
            Some(Item::new(link, title, publisher, published_at))
        })
        .collect()
}

/// Publisher name for an article URL.
pub fn publisher_for(original_link: &str) -> String {
    let Some(host) = url_host(original_link) else {
        return UNKNOWN_PUBLISHER.to_string();
    };
    if let Some((_, name)) = PUBLISHERS.iter().find(|(domain, _)| host.contains(domain)) {
        return name.to_string();
    }
    host.split('.')
        .next()
        .filter(|label| !label.is_empty())
        .map(|label| label.to_uppercase())
        .unwrap_or_else(|| UNKNOWN_PUBLISHER.to_string())
}

/// Remove tags and decode entities from API-supplied markup.
pub fn clean_html(text: &str) -> String {
    let fragment = Html::parse_fragment(text);
    let decoded: String = fragment.root_element().text().collect();
    compact_whitespace(&decoded)
}

fn compact_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether the API cut the title short.
fn is_truncated(title: &str) -> bool {
    let title = title.trim_end();
    title.ends_with("...") || title.ends_with('…')
}

/// Headline of an article page.
///
/// Naver article pages are read from their headline element first. Every
/// page then falls back to `og:title`, and finally to `<title>` with a
/// trailing ` - Publisher` or ` | Publisher` removed.
fn page_title(html: &str, url: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    if url_host(url).is_some_and(|h| h.ends_with("news.naver.com")) {
        for raw in NAVER_TITLE_SELECTORS {
            let Ok(selector) = Selector::parse(raw) else {
                continue;
            };
            let found = doc
                .select(&selector)
                .map(|el| compact_whitespace(&el.text().collect::<String>()))
                .find(|t| !t.is_empty());
            if found.is_some() {
                return found;
            }
        }
    }

    if let Ok(selector) = Selector::parse(r#"meta[property="og:title"]"#) {
        let og = doc
            .select(&selector)
            .filter_map(|el| el.value().attr("content"))
            .map(compact_whitespace)
            .find(|t| !t.is_empty());
        if og.is_some() {
            return og;
        }
    }

    let selector = Selector::parse("title").ok()?;
    let title = compact_whitespace(&doc.select(&selector).next()?.text().collect::<String>());
    let title = title.split(" - ").next().unwrap_or(&title);
    let title = title.split(" | ").next().unwrap_or(title).trim();
    (!title.is_empty()).then(|| title.to_string())
}
