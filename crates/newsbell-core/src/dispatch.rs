//! Retrying message dispatcher.
//!
//! Every outbound notification goes through [`Dispatcher::send`]:
//!
//! ```text
//! pending ──▶ attempt ──ok──▶ delivered (sleep success_delay)
//!                │
//!                ├─transient─▶ sleep delay_for(n) ──▶ attempt … ──▶ failed
//!                ├─permanent─▶ mark blocked ──▶ blocked
//!                └─fatal─────▶ failed
//! ```
//!
//! Sleeps go through the injected [`Clock`], so the backoff schedule can
//! be asserted in tests without waiting.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::models::SubscriberId;
use crate::retry::{ErrorClass, RetryPolicy};
use crate::store::Store;
use crate::traits::Transport;

/// Result of one [`Dispatcher::send`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, reason: String },
    /// The receiver can no longer be reached; the subscriber is now marked blocked.
    Blocked { reason: String },
}

impl DispatchOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    success_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        success_delay: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            clock,
            policy,
            success_delay,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Deliver `text` to `subscriber`, retrying transient failures.
    pub async fn send(&self, subscriber: SubscriberId, text: &str) -> DispatchOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.transport.send_message(subscriber, text).await {
                Ok(()) => {
                    info!(subscriber, attempt, "message delivered");
                    if !self.success_delay.is_zero() {
                        self.clock.sleep(self.success_delay).await;
                    }
                    return DispatchOutcome::Delivered { attempts: attempt };
                }
                Err(err) => err,
            };

            match self.policy.classify(&err) {
                ErrorClass::Permanent => {
                    warn!(subscriber, error = %err, "receiver unreachable, marking blocked");
                    if let Err(e) = self.store.mark_blocked(subscriber).await {
                        warn!(subscriber, error = %e, "failed to persist blocked flag");
                    }
                    return DispatchOutcome::Blocked {
                        reason: err.description,
                    };
                }
                ErrorClass::Fatal => {
                    warn!(subscriber, attempt, error = %err, "send failed, not retrying");
                    return DispatchOutcome::Failed {
                        attempts: attempt,
                        reason: err.description,
                    };
                }
                ErrorClass::Transient if attempt >= max_attempts => {
                    warn!(subscriber, attempt, error = %err, "send failed after all retries");
                    return DispatchOutcome::Failed {
                        attempts: attempt,
                        reason: err.description,
                    };
                }
                ErrorClass::Transient => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        subscriber,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient send failure, retrying"
                    );
                    self.clock.sleep(delay).await;
                }
            }
        }
    }
}
