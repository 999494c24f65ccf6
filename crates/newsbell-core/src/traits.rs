//! Collaborator contracts.
//!
//! The engine never talks to the network directly. News search, message
//! delivery, and price history each sit behind a trait defined here; the
//! application crate provides HTTP implementations and the tests provide
//! scripted fakes.
//!
//! ```text
//!   SearchProvider ──▶ plan::ResultPool ──▶ cluster ──▶ resolve ──▶ ledger
//!                                                                    │
//!   QuoteProvider ──▶ alert::decide ─────────────────────────┐       ▼
//!                                                            └──▶ Dispatcher ──▶ Transport
//! ```

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Item, QuoteBar, SubscriberId};

// ═══════════════════════════════════════════════════════════════════════
// News Search
// ═══════════════════════════════════════════════════════════════════════

/// A best-effort news search backend.
///
/// Implementations may rank or deduplicate on their own. An error for one
/// query must not affect other queries; callers treat it as zero results.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Return up to `max_results` items matching `query`.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Item>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Message Transport
// ═══════════════════════════════════════════════════════════════════════

/// Raw failure reported by a [`Transport`].
///
/// The dispatcher classifies it with a [`crate::retry::Classifier`];
/// transports only describe what happened.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{description}")]
pub struct TransportError {
    /// Upstream status code, when the channel answered at all.
    pub status: Option<u16>,
    pub description: String,
    /// Connection, timeout or other network-layer failure.
    pub network: bool,
}

impl TransportError {
    pub fn network(description: impl Into<String>) -> Self {
        Self {
            status: None,
            description: description.into(),
            network: true,
        }
    }

    pub fn status(status: u16, description: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            description: description.into(),
            network: false,
        }
    }

    pub fn other(description: impl Into<String>) -> Self {
        Self {
            status: None,
            description: description.into(),
            network: false,
        }
    }
}

/// Outbound channel to subscribers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, subscriber: SubscriberId, text: &str)
        -> Result<(), TransportError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Quote History
// ═══════════════════════════════════════════════════════════════════════

/// Daily price history source for the threshold alert subsystem.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Bars for `symbol` over `range` (e.g. `"2y"`), oldest first.
    async fn history(&self, symbol: &str, range: &str) -> Result<Vec<QuoteBar>>;
}
