//! Fetch planning and per-expression result reconstruction.
//!
//! One cycle serves many subscribers whose expressions overlap heavily.
//! The planner turns every registered expression into a minimal set of
//! search queries, each fetched once:
//!
//! | Shape | Queries | Reconstruction |
//! |-------|---------|----------------|
//! | `a` | `a` | clustered results of `a`, capped |
//! | `a AND b` | `a`, `b`, `a +b`, `b +a` | union of compounds, dedup, cluster, cap |
//! | `a AND b AND c …` | primitives + 3 lead rotations | same as above |
//! | `a OR b …` | `a`, `b`, … | per-term clusters, dedup, [`allocate_slots`] |
//! | nested | primitives | local evaluation over the pooled results |
//!
//! Primitive terms are always fetched, even for AND expressions: when every
//! compound query comes back empty the AND falls back to intersecting the
//! primitive pools locally.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cluster::{cluster_items, RepresentativeRanking};
use crate::expression::{Expression, Shape};
use crate::models::{Item, Subscription};

/// Default output cap for one expression.
pub const DEFAULT_CAP: usize = 15;

/// Queries to fetch in one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPlan {
    /// Distinct primitive terms.
    pub terms: Vec<String>,
    /// Distinct compound (AND) queries.
    pub compounds: Vec<String>,
}

impl FetchPlan {
    /// Plan the fetches for every subscription. Invalid stored expressions are skipped.
    pub fn build(subscriptions: &[Subscription]) -> Self {
        let mut plan = Self::default();
        for sub in subscriptions {
            match Expression::parse(&sub.expression) {
                Ok(expr) => plan.add(&expr),
                Err(e) => warn!(
                    subscriber = sub.subscriber,
                    expression = %sub.expression,
                    error = %e,
                    "skipping invalid expression"
                ),
            }
        }
        debug!(
            subscriptions = subscriptions.len(),
            terms = plan.terms.len(),
            compounds = plan.compounds.len(),
            "built fetch plan"
        );
        plan
    }

    pub fn for_expression(expr: &Expression) -> Self {
        let mut plan = Self::default();
        plan.add(expr);
        plan
    }

    pub fn add(&mut self, expr: &Expression) {
        for term in expr.primitive_terms() {
            push_unique(&mut self.terms, term);
        }
        if let Shape::All(terms) = expr.shape() {
            for query in compound_queries(&terms) {
                push_unique(&mut self.compounds, query);
            }
        }
    }

    /// Every query in fetch order: primitives first, then compounds.
    pub fn queries(&self) -> Vec<String> {
        self.terms
            .iter()
            .chain(self.compounds.iter())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.terms.len() + self.compounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

fn required(term: &str) -> String {
    if term.contains(char::is_whitespace) {
        format!("+\"{}\"", term)
    } else {
        format!("+{}", term)
    }
}

fn compound(lead: &str, rest: &[&String]) -> String {
    let mut query = lead.to_string();
    for term in rest {
        query.push(' ');
        query.push_str(&required(term));
    }
    query
}

/// Compound queries narrowing an AND expression at the source.
///
/// Two terms yield both orderings; three or more yield three queries, each
/// with one of the first three terms in the lead position and every other
/// term required.
pub fn compound_queries(terms: &[String]) -> Vec<String> {
    if terms.len() < 2 {
        return Vec::new();
    }
    let leads = if terms.len() == 2 { 2 } else { 3 };
    (0..leads)
        .map(|lead| {
            let rest: Vec<&String> = terms
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != lead)
                .map(|(_, t)| t)
                .collect();
            compound(&terms[lead], &rest)
        })
        .collect()
}

/// Raw and clustered results for each fetched query.
pub struct ResultPool {
    threshold: f64,
    ranking: Arc<dyn RepresentativeRanking>,
    raw: HashMap<String, Vec<Item>>,
    clustered: HashMap<String, Vec<Item>>,
}

impl ResultPool {
    pub fn new(threshold: f64, ranking: Arc<dyn RepresentativeRanking>) -> Self {
        Self {
            threshold,
            ranking,
            raw: HashMap::new(),
            clustered: HashMap::new(),
        }
    }

    /// Store the results of one query and cluster them once.
    pub fn insert(&mut self, query: impl Into<String>, items: Vec<Item>) {
        let query = query.into();
        let clustered = cluster_items(&items, self.threshold, self.ranking.as_ref());
        self.clustered.insert(query.clone(), clustered);
        self.raw.insert(query, items);
    }

    /// Raw results; empty when the query was not fetched or failed.
    pub fn raw(&self, query: &str) -> &[Item] {
        self.raw.get(query).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clustered(&self, query: &str) -> &[Item] {
        self.clustered.get(query).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Total raw items across every query.
    pub fn item_count(&self) -> usize {
        self.raw.values().map(Vec::len).sum()
    }

    fn cluster(&self, items: &[Item]) -> Vec<Item> {
        cluster_items(items, self.threshold, self.ranking.as_ref())
    }
}

fn union_by_id<'a>(lists: impl IntoIterator<Item = &'a [Item]>) -> Vec<Item> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for list in lists {
        for item in list {
            if seen.insert(item.id.as_str()) {
                out.push(item.clone());
            }
        }
    }
    out
}

/// Items from the primitive pools that satisfy `expr`, where a term holds
/// when the item was fetched by it or its title contains it.
fn local_matches(expr: &Expression, pool: &ResultPool) -> Vec<Item> {
    let terms = expr.primitive_terms();
    let fetched_by: Vec<HashSet<&str>> = terms
        .iter()
        .map(|t| pool.raw(t).iter().map(|i| i.id.as_str()).collect())
        .collect();

    let candidates = union_by_id(terms.iter().map(|t| pool.raw(t)));
    candidates
        .into_iter()
        .filter(|item| {
            let title = item.title.to_lowercase();
            expr.evaluate(&mut |term: &str| {
                let idx = terms.iter().position(|t| t == term);
                idx.is_some_and(|i| fetched_by[i].contains(item.id.as_str()))
                    || title.contains(&term.to_lowercase())
            })
        })
        .collect()
}

/// Reconstruct the result set of one expression from the shared pool.
pub fn resolve(expr: &Expression, pool: &ResultPool, cap: usize) -> Vec<Item> {
    let mut items = match expr.shape() {
        Shape::Single(term) => pool.clustered(&term).to_vec(),
        Shape::All(terms) => {
            let queries = compound_queries(&terms);
            let union = union_by_id(queries.iter().map(|q| pool.raw(q)));
            if union.is_empty() {
                debug!(expression = %expr, "compound queries empty, intersecting locally");
                pool.cluster(&local_matches(expr, pool))
            } else {
                pool.cluster(&union)
            }
        }
        Shape::Any(terms) => resolve_any(&terms, pool, cap),
        Shape::Nested => pool.cluster(&local_matches(expr, pool)),
    };
    items.truncate(cap);
    items
}

fn resolve_any(terms: &[String], pool: &ResultPool, cap: usize) -> Vec<Item> {
    let mut seen = HashSet::new();
    let per_term: Vec<Vec<Item>> = terms
        .iter()
        .map(|t| {
            pool.clustered(t)
                .iter()
                .filter(|item| seen.insert(item.id.clone()))
                .cloned()
                .collect()
        })
        .collect();

    let counts: Vec<usize> = per_term.iter().map(Vec::len).collect();
    let slots = allocate_slots(&counts, cap);
    debug!(?counts, ?slots, cap, "allocated OR slots");

    per_term
        .into_iter()
        .zip(slots)
        .flat_map(|(items, n)| items.into_iter().take(n))
        .collect()
}

/// Split `cap` output slots across terms proportionally to their result counts.
///
/// When the counts fit within `cap` every term keeps all of its results.
/// Otherwise each term gets `floor(cap × count / total)`, at least one slot
/// if it has any result, and the remainder goes to the most prolific term.
/// No term receives more slots than it has results and the sum never
/// exceeds `cap`; with more contributing terms than slots, the least
/// prolific terms get none.
pub fn allocate_slots(counts: &[usize], cap: usize) -> Vec<usize> {
    let total: usize = counts.iter().sum();
    if total <= cap {
        return counts.to_vec();
    }

    let mut slots = vec![0; counts.len()];
    if cap == 0 {
        return slots;
    }

    // Indices of contributing terms, most prolific first (stable on ties).
    let mut by_count: Vec<usize> = (0..counts.len()).filter(|&i| counts[i] > 0).collect();
    by_count.sort_by(|&a, &b| counts[b].cmp(&counts[a]));

    if by_count.len() >= cap {
        for &i in by_count.iter().take(cap) {
            slots[i] = 1;
        }
        return slots;
    }

    for &i in &by_count {
        slots[i] = (cap * counts[i] / total).max(1).min(counts[i]);
    }

    let mut assigned: usize = slots.iter().sum();
    while assigned > cap {
        // Trim from the largest allocation that can spare a slot.
        let Some(&i) = by_count
            .iter()
            .filter(|&&i| slots[i] > 1)
            .max_by(|&&a, &&b| slots[a].cmp(&slots[b]).then(b.cmp(&a)))
        else {
            break;
        };
        slots[i] -= 1;
        assigned -= 1;
    }

    for &i in &by_count {
        if assigned >= cap {
            break;
        }
        let extra = (cap - assigned).min(counts[i] - slots[i]);
        slots[i] += extra;
        assigned += extra;
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NoPreference;
    use chrono::{Duration, TimeZone, Utc};

    fn items(prefix: &str, n: usize) -> Vec<Item> {
        let base = Utc.with_ymd_and_hms(2025, 10, 18, 0, 0, 0).unwrap();
        // Titles are far apart so clustering keeps them separate.
        let words = [
            "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india",
            "juliet", "kilo", "lima",
        ];
        (0..n)
            .map(|i| {
                Item::new(
                    format!("https://{prefix}.example/{i}"),
                    format!("{prefix} {} {}", words[i % words.len()], i * 7919),
                    "EX",
                    base + Duration::minutes(i as i64),
                )
            })
            .collect()
    }

    fn pool() -> ResultPool {
        // Threshold 1.0 only merges identical titles.
        ResultPool::new(1.0, Arc::new(NoPreference))
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_allocation_example() {
        let slots = allocate_slots(&[10, 3, 2], 10);
        assert_eq!(slots, vec![7, 2, 1]);
        assert_eq!(slots.iter().sum::<usize>(), 10);
    }

    #[test]
    fn test_allocation_fits_under_cap() {
        assert_eq!(allocate_slots(&[3, 0, 2], 10), vec![3, 0, 2]);
    }

    #[test]
    fn test_allocation_every_term_represented() {
        let slots = allocate_slots(&[100, 1, 1], 4);
        assert_eq!(slots, vec![2, 1, 1]);
        let slots = allocate_slots(&[50, 1, 1, 1], 10);
        assert!(slots.iter().all(|&s| s >= 1));
        assert_eq!(slots.iter().sum::<usize>(), 10);
    }

    #[test]
    fn test_allocation_respects_term_counts() {
        // Remainder overflows the largest term and spills to the next.
        let slots = allocate_slots(&[5, 5, 5], 14);
        assert_eq!(slots, vec![5, 5, 4]);
    }

    #[test]
    fn test_allocation_more_terms_than_slots() {
        let slots = allocate_slots(&[1, 9, 4, 2], 2);
        assert_eq!(slots, vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_compound_queries() {
        assert!(compound_queries(&strings(&["a"])).is_empty());
        assert_eq!(
            compound_queries(&strings(&["삼성", "전자"])),
            vec!["삼성 +전자", "전자 +삼성"]
        );
        assert_eq!(
            compound_queries(&strings(&["a", "b", "c", "d"])),
            vec!["a +b +c +d", "b +a +c +d", "c +a +b +d"]
        );
        assert_eq!(
            compound_queries(&strings(&["new york", "fed"])),
            vec!["new york +fed", "fed +\"new york\""]
        );
    }

    #[test]
    fn test_plan_fetches_each_term_once() {
        let subs = vec![
            Subscription::new(1, "삼성 OR 애플"),
            Subscription::new(2, "삼성"),
            Subscription::new(3, "삼성 AND 전자"),
            Subscription::new(4, "a AND OR"),
        ];
        let plan = FetchPlan::build(&subs);
        assert_eq!(plan.terms, strings(&["삼성", "애플", "전자"]));
        assert_eq!(plan.compounds, strings(&["삼성 +전자", "전자 +삼성"]));
        assert_eq!(plan.len(), 5);
    }

    #[test]
    fn test_resolve_or_end_to_end_allocation() {
        let mut p = pool();
        p.insert("삼성", items("samsung", 8));
        p.insert("애플", items("apple", 4));
        let expr = Expression::parse("삼성 OR 애플").unwrap();
        let out = resolve(&expr, &p, 10);
        assert_eq!(out.len(), 10);
        let samsung = out.iter().filter(|i| i.id.contains("samsung")).count();
        let apple = out.iter().filter(|i| i.id.contains("apple")).count();
        assert_eq!((samsung, apple), (7, 3));
    }

    #[test]
    fn test_resolve_or_dedups_across_terms() {
        let mut p = pool();
        let shared = items("shared", 2);
        p.insert("a", shared.clone());
        p.insert("b", shared);
        let expr = Expression::parse("a OR b").unwrap();
        assert_eq!(resolve(&expr, &p, 10).len(), 2);
    }

    #[test]
    fn test_resolve_and_uses_compounds() {
        let mut p = pool();
        p.insert("삼성", items("samsung", 5));
        p.insert("전자", items("electronics", 5));
        p.insert("삼성 +전자", items("both", 3));
        p.insert("전자 +삼성", items("both", 4));
        let expr = Expression::parse("삼성 AND 전자").unwrap();
        let out = resolve(&expr, &p, 15);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|i| i.id.contains("both")));
    }

    #[test]
    fn test_resolve_and_falls_back_to_local_intersection() {
        let mut p = pool();
        let mut samsung = items("samsung", 3);
        samsung[0].title = "삼성 전자 신제품".into();
        let mut electronics = items("electronics", 2);
        electronics.push(samsung[1].clone());
        p.insert("삼성", samsung.clone());
        p.insert("전자", electronics);
        let expr = Expression::parse("삼성 AND 전자").unwrap();
        let out = resolve(&expr, &p, 15);
        let ids: Vec<_> = out.iter().map(|i| i.id.as_str()).collect();
        // samsung[0] matches by title, samsung[1] was fetched by both terms.
        assert_eq!(ids, vec![samsung[0].id.as_str(), samsung[1].id.as_str()]);
    }

    #[test]
    fn test_resolve_nested() {
        let mut p = pool();
        let mut apple = items("apple", 3);
        apple[0].title = "apple chip news".into();
        let mut samsung = items("samsung", 2);
        samsung[1].title = "samsung chip fab".into();
        p.insert("apple", apple.clone());
        p.insert("samsung", samsung.clone());
        p.insert("chip", vec![apple[2].clone()]);
        let expr = Expression::parse("(apple OR samsung) AND chip").unwrap();
        let ids: Vec<String> = resolve(&expr, &p, 15).into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![apple[0].id.clone(), apple[2].id.clone(), samsung[1].id.clone()]);
    }

    #[test]
    fn test_resolve_single_caps_and_handles_missing() {
        let mut p = pool();
        p.insert("a", items("a", 20));
        let expr = Expression::parse("a").unwrap();
        assert_eq!(resolve(&expr, &p, DEFAULT_CAP).len(), DEFAULT_CAP);
        let missing = Expression::parse("zzz").unwrap();
        assert!(resolve(&missing, &p, DEFAULT_CAP).is_empty());
    }
}
