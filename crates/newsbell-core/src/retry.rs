//! Retry policy for outbound delivery.
//!
//! A [`RetryPolicy`] decides how many attempts a send gets, how long to
//! wait between them, and which failures are worth retrying at all:
//!
//! | Class | Examples | Behavior |
//! |-------|----------|----------|
//! | [`ErrorClass::Transient`] | connect/timeout errors, HTTP 429, 5xx | retry with exponential backoff |
//! | [`ErrorClass::Permanent`] | bot blocked, 403, chat not found | stop, mark subscriber blocked |
//! | [`ErrorClass::Fatal`] | any other API error | stop, log |

use std::time::Duration;

use crate::traits::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
    Fatal,
}

pub type Classifier = fn(&TransportError) -> ErrorClass;

const PERMANENT_MARKERS: &[&str] = &["blocked", "forbidden", "chat not found", "deactivated"];

/// Default classification of transport failures.
pub fn default_classifier(err: &TransportError) -> ErrorClass {
    let text = err.description.to_lowercase();
    if err.status == Some(403) || PERMANENT_MARKERS.iter().any(|m| text.contains(m)) {
        return ErrorClass::Permanent;
    }
    if err.network {
        return ErrorClass::Transient;
    }
    match err.status {
        Some(429) => ErrorClass::Transient,
        Some(s) if s >= 500 => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub classify: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            classify: default_classifier,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("multiplier", &self.multiplier)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// With the defaults: 2s after attempt 1, 4s after attempt 2.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        self.base_delay.mul_f64(self.multiplier.powi(exp))
    }

    pub fn classify(&self, err: &TransportError) -> ErrorClass {
        (self.classify)(err)
    }
}
