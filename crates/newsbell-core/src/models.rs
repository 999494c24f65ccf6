//! Core data models shared by the matching, delivery, and alert pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Identifier of a subscriber on the outbound channel (a chat id).
pub type SubscriberId = i64;

/// A deliverable news record.
///
/// Identity is the source URL (`id`). `cluster_size` is 1 for raw items and
/// is set by [`crate::cluster::cluster_items`] to the number of near-duplicate
/// members the item represents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub publisher: String,
    pub published_at: DateTime<Utc>,
    pub cluster_size: usize,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        publisher: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            publisher: publisher.into(),
            published_at,
            cluster_size: 1,
        }
    }

    /// Copy of this item representing a cluster of `size` members.
    pub fn with_cluster_size(&self, size: usize) -> Self {
        Self {
            cluster_size: size.max(1),
            ..self.clone()
        }
    }

    /// Host part of the item URL, lower-cased, without a leading `www.`.
    pub fn host(&self) -> Option<String> {
        url_host(&self.id)
    }
}

/// Host of an absolute URL, lower-cased, without a leading `www.`.
///
/// IPv6 hosts keep their brackets. Returns `None` for anything that does not
/// parse or has no host (`mailto:`, relative paths).
pub fn url_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    if host.is_empty() {
        return None;
    }
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// A registered (subscriber, expression) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber: SubscriberId,
    pub expression: String,
}

impl Subscription {
    pub fn new(subscriber: SubscriberId, expression: impl Into<String>) -> Self {
        Self {
            subscriber,
            expression: expression.into(),
        }
    }
}

/// One observation of the tracked series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuoteBar {
    pub timestamp: DateTime<Utc>,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Current position of the tracked index relative to its reference peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub symbol: String,
    pub current: f64,
    pub peak: f64,
    pub peak_date: String,
    /// `current / peak × 100`, rounded to two decimals.
    pub percent_of_peak: f64,
    /// `100 − percent_of_peak`, rounded to two decimals.
    pub drop_pct: f64,
}

/// Highest alert level already announced for one reference peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLevelState {
    pub reference_peak: f64,
    pub peak_date: String,
    pub last_level: u32,
}

/// A threshold alert held back by an active quiet window.
///
/// At most one per subscriber; a newer deferral overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAlert {
    pub level: u32,
    pub snapshot: IndexSnapshot,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_host() {
        assert_eq!(
            url_host("https://www.yna.co.kr/view/AKR123?x=1").as_deref(),
            Some("yna.co.kr")
        );
        assert_eq!(
            url_host("http://n.news.naver.com:8080/article/1").as_deref(),
            Some("n.news.naver.com")
        );
        assert_eq!(
            url_host("https://user:pw@WWW.Hankyung.com/article/1").as_deref(),
            Some("hankyung.com")
        );
        assert_eq!(url_host("not a url"), None);
        assert_eq!(url_host("mailto:desk@yna.co.kr"), None);
    }

    #[test]
    fn test_url_host_ipv6_keeps_whole_address() {
        assert_eq!(
            url_host("http://[2001:db8::1]:8080/news/1").as_deref(),
            Some("[2001:db8::1]")
        );
    }

    #[test]
    fn test_with_cluster_size_never_zero() {
        let item = Item::new("https://a.example/1", "t", "p", Utc::now());
        assert_eq!(item.cluster_size, 1);
        assert_eq!(item.with_cluster_size(4).cluster_size, 4);
        assert_eq!(item.with_cluster_size(0).cluster_size, 1);
    }
}
