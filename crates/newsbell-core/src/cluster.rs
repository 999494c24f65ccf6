//! Near-duplicate clustering of news items.
//!
//! Publishers syndicate the same story under slightly different headlines.
//! [`cluster_items`] collapses those into one representative per story and
//! records how many members each story had.
//!
//! # Algorithm
//!
//! 1. Normalize every title: lower-case, drop punctuation, collapse
//!    whitespace. Titles arrive as plain text; markup is removed by the
//!    source that decoded them, so a literal `<` is just punctuation here.
//! 2. Walk items in input order. Compare each title with the leader (first
//!    member) of every open cluster using the normalized Levenshtein ratio.
//! 3. Join the first cluster scoring `>= threshold`; otherwise open a new
//!    cluster led by this item.
//! 4. For each cluster pick the representative: the most recent member among
//!    those the [`RepresentativeRanking`] prefers, or the most recent member
//!    overall when no member is preferred.
//!
//! Cost is O(n·k) comparisons for n items and k open clusters, which is fine
//! for the ≤100 items a single fetch returns.

use strsim::normalized_levenshtein;
use tracing::debug;

use crate::models::Item;

/// Threshold used when clustering pooled results in the scheduled cycle.
pub const CYCLE_THRESHOLD: f64 = 0.60;

/// Threshold used for single-keyword manual checks.
pub const MANUAL_THRESHOLD: f64 = 0.75;

/// Chooses which cluster member is shown.
///
/// Members with a higher priority win; `0` means "no preference", in which
/// case recency decides.
pub trait RepresentativeRanking: Send + Sync {
    fn priority(&self, item: &Item) -> u32;
}

/// Every member is equal; the most recent one represents the cluster.
pub struct NoPreference;

impl RepresentativeRanking for NoPreference {
    fn priority(&self, _item: &Item) -> u32 {
        0
    }
}

/// Prefer items whose URL host is one of the given domains.
///
/// Earlier domains in the list rank higher. A domain also matches its
/// subdomains (`naver.com` matches `n.news.naver.com`).
#[derive(Debug, Clone, Default)]
pub struct PreferredDomains {
    domains: Vec<String>,
}

impl PreferredDomains {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.into().trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }
}

impl RepresentativeRanking for PreferredDomains {
    fn priority(&self, item: &Item) -> u32 {
        let Some(host) = item.host() else {
            return 0;
        };
        self.domains
            .iter()
            .position(|d| host == *d || host.ends_with(&format!(".{}", d)))
            .map(|idx| (self.domains.len() - idx) as u32)
            .unwrap_or(0)
    }
}

/// Normalize a plain-text headline for comparison.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Symmetric similarity of two headlines in `[0.0, 1.0]`.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&normalize_title(a), &normalize_title(b))
}

struct Cluster {
    leader: String,
    members: Vec<usize>,
}

/// Collapse near-duplicates, returning one representative per cluster.
///
/// Output order follows the order in which clusters were opened; every
/// returned item carries its cluster's member count in `cluster_size`.
pub fn cluster_items(
    items: &[Item],
    threshold: f64,
    ranking: &dyn RepresentativeRanking,
) -> Vec<Item> {
    let mut clusters: Vec<Cluster> = Vec::new();

    for (idx, item) in items.iter().enumerate() {
        let norm = normalize_title(&item.title);
        let joined = clusters.iter_mut().find(|c| {
            let score = normalized_levenshtein(&norm, &c.leader);
            if score >= threshold {
                debug!(score, title = %item.title, "near-duplicate joined cluster");
                true
            } else {
                false
            }
        });
        match joined {
            Some(cluster) => cluster.members.push(idx),
            None => clusters.push(Cluster {
                leader: norm,
                members: vec![idx],
            }),
        }
    }

    if clusters.len() < items.len() {
        debug!(
            before = items.len(),
            after = clusters.len(),
            "clustered near-duplicate items"
        );
    }

    clusters
        .iter()
        .map(|c| {
            let rep = representative(items, &c.members, ranking);
            items[rep].with_cluster_size(c.members.len())
        })
        .collect()
}

fn representative(items: &[Item], members: &[usize], ranking: &dyn RepresentativeRanking) -> usize {
    let top = members
        .iter()
        .map(|&i| ranking.priority(&items[i]))
        .max()
        .unwrap_or(0);

    let mut best: Option<usize> = None;
    for &i in members {
        if ranking.priority(&items[i]) != top {
            continue;
        }
        match best {
            Some(b) if items[b].published_at >= items[i].published_at => {}
            _ => best = Some(i),
        }
    }
    best.unwrap_or(members[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn item(id: &str, title: &str, minutes: i64) -> Item {
        let base = Utc.with_ymd_and_hms(2025, 10, 18, 9, 0, 0).unwrap();
        Item::new(id, title, "pub", base + Duration::minutes(minutes))
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("삼성전자,  3분기   실적 발표!!"),
            "삼성전자 3분기 실적 발표"
        );
        assert_eq!(normalize_title("Apple's \"New\" iPhone"), "apples new iphone");
    }

    #[test]
    fn test_less_than_sign_keeps_rest_of_title() {
        assert_eq!(
            normalize_title("KOSPI < 2500 crash as foreign selling deepens"),
            "kospi 2500 crash as foreign selling deepens"
        );

        let items = vec![
            item("1", "KOSPI < 2500 crash as foreign selling deepens", 0),
            item("2", "KOSPI < 3000 rally on chip exports", 1),
        ];
        let out = cluster_items(&items, MANUAL_THRESHOLD, &NoPreference);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|i| i.cluster_size == 1));
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = "Samsung posts record quarterly profit";
        let b = "Samsung posts record profit for quarter";
        assert_eq!(title_similarity(a, b), title_similarity(b, a));
        assert!((title_similarity(a, a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_near_duplicates_collapse_with_count() {
        let items = vec![
            item("https://a.com/1", "삼성전자, 3분기 영업이익 10조 돌파", 0),
            item("https://b.com/1", "삼성전자 3분기 영업이익 10조 돌파", 5),
            item("https://c.com/1", "애플, 새로운 아이폰 공개", 1),
            item("https://d.com/1", "[속보] 삼성전자, 3분기 영업이익 10조 돌파", 2),
        ];
        let out = cluster_items(&items, CYCLE_THRESHOLD, &NoPreference);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].cluster_size, 3);
        // Most recent member represents the cluster.
        assert_eq!(out[0].id, "https://b.com/1");
        assert_eq!(out[1].cluster_size, 1);
        assert_eq!(out[1].id, "https://c.com/1");
    }

    #[test]
    fn test_preferred_domain_beats_recency() {
        let items = vec![
            item("https://n.news.naver.com/a/1", "Fed holds rates steady", 0),
            item("https://other.com/x", "Fed holds rates steady again", 30),
        ];
        let ranking = PreferredDomains::new(["naver.com"]);
        let out = cluster_items(&items, 0.6, &ranking);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "https://n.news.naver.com/a/1");
        assert_eq!(out[0].cluster_size, 2);
    }

    #[test]
    fn test_preferred_domains_rank_by_position() {
        let ranking = PreferredDomains::new(["yna.co.kr", "naver.com"]);
        assert_eq!(ranking.priority(&item("https://www.yna.co.kr/v", "t", 0)), 2);
        assert_eq!(ranking.priority(&item("https://n.news.naver.com/v", "t", 0)), 1);
        assert_eq!(ranking.priority(&item("https://notnaver.com/v", "t", 0)), 0);
    }

    #[test]
    fn test_cluster_count_is_order_insensitive() {
        let items = vec![
            item("1", "Oil prices jump after supply cut", 0),
            item("2", "Tech stocks rally on AI optimism", 1),
            item("3", "Oil prices jump after supply cuts", 2),
            item("4", "Local team wins championship final", 3),
            item("5", "Tech stocks rally on AI optimism again", 4),
        ];
        let forward = cluster_items(&items, CYCLE_THRESHOLD, &NoPreference);
        let mut reversed_input = items.clone();
        reversed_input.reverse();
        let reversed = cluster_items(&reversed_input, CYCLE_THRESHOLD, &NoPreference);
        assert_eq!(forward.len(), 3);
        assert_eq!(forward.len(), reversed.len());
        let total: usize = reversed.iter().map(|i| i.cluster_size).sum();
        assert_eq!(total, items.len());
    }

    #[test]
    fn test_threshold_controls_merging() {
        let items = vec![
            item("1", "Markets close higher on Friday", 0),
            item("2", "Markets close lower on Friday", 1),
        ];
        assert_eq!(cluster_items(&items, 0.75, &NoPreference).len(), 1);
        assert_eq!(cluster_items(&items, 0.99, &NoPreference).len(), 2);
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster_items(&[], CYCLE_THRESHOLD, &NoPreference).is_empty());
    }
}
