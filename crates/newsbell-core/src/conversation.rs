//! Per-subscriber command handling.
//!
//! Some commands take their argument in a follow-up message (`/add`, then
//! the expression). What each subscriber is expected to send next lives in
//! an explicit [`ConversationState`] owned by the caller, so the handling
//! logic can be driven without any chat transport.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `/add [expr]` | register, or prompt for the expression |
//! | `/remove <expr>` | unregister one expression |
//! | `/list` | list expressions |
//! | `/clear` | remove every expression |
//! | `/quiet [start end]` | set the quiet window, or prompt for start and end |
//! | `/quiet off`, `/quiet on` | toggle the configured window |
//! | `/check` | request an on-demand check |
//! | `/cancel` | drop whatever input was awaited |

use std::collections::HashMap;

use anyhow::Result;

use crate::models::SubscriberId;
use crate::quiet::{parse_hhmm, QuietWindow};
use crate::store::Store;
use crate::subscription::{self, SubscriptionError};

/// What the next free-text message from a subscriber means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Awaiting {
    #[default]
    Idle,
    Expression,
    QuietStart,
    QuietEnd {
        start: u16,
    },
}

/// Outcome of one message, for the presentation layer to render.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Help,
    Added(String),
    AlreadyRegistered(String),
    InvalidExpression(String),
    Removed(String),
    NotRegistered(String),
    Cleared(u64),
    List(Vec<String>),
    PromptExpression,
    PromptQuietStart,
    PromptQuietEnd { start: u16 },
    InvalidTime(String),
    QuietSet(QuietWindow),
    /// Quiet hours turned off; deferred alerts should be flushed now.
    QuietDisabled,
    QuietEnabled(QuietWindow),
    NoQuietWindow,
    CheckRequested,
    Cancelled,
    Unknown(String),
}

#[derive(Debug, Default)]
pub struct ConversationState {
    awaiting: HashMap<SubscriberId, Awaiting>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn awaiting(&self, subscriber: SubscriberId) -> Awaiting {
        self.awaiting.get(&subscriber).copied().unwrap_or_default()
    }

    fn set(&mut self, subscriber: SubscriberId, next: Awaiting) {
        if next == Awaiting::Idle {
            self.awaiting.remove(&subscriber);
        } else {
            self.awaiting.insert(subscriber, next);
        }
    }

    /// Handle one incoming message.
    ///
    /// Commands always reset the awaited input first; free text is routed
    /// by the current [`Awaiting`] state.
    pub async fn handle(
        &mut self,
        store: &dyn Store,
        subscriber: SubscriberId,
        message: &str,
    ) -> Result<Reply> {
        let message = message.trim();
        if let Some(command) = message.strip_prefix('/') {
            self.set(subscriber, Awaiting::Idle);
            let (name, arg) = match command.split_once(char::is_whitespace) {
                Some((name, arg)) => (name, arg.trim()),
                None => (command, ""),
            };
            return self.command(store, subscriber, name, arg).await;
        }

        match self.awaiting(subscriber) {
            Awaiting::Idle => Ok(Reply::Unknown(message.to_string())),
            Awaiting::Expression => {
                self.set(subscriber, Awaiting::Idle);
                add(store, subscriber, message).await
            }
            Awaiting::QuietStart => match parse_hhmm(message) {
                Ok(start) => {
                    self.set(subscriber, Awaiting::QuietEnd { start });
                    Ok(Reply::PromptQuietEnd { start })
                }
                Err(_) => Ok(Reply::InvalidTime(message.to_string())),
            },
            Awaiting::QuietEnd { start } => match parse_hhmm(message) {
                Ok(end) => {
                    self.set(subscriber, Awaiting::Idle);
                    set_quiet(store, subscriber, start, end).await
                }
                Err(_) => Ok(Reply::InvalidTime(message.to_string())),
            },
        }
    }

    async fn command(
        &mut self,
        store: &dyn Store,
        subscriber: SubscriberId,
        name: &str,
        arg: &str,
    ) -> Result<Reply> {
        match (name, arg) {
            ("start" | "help", _) => Ok(Reply::Help),
            ("add", "") => {
                self.set(subscriber, Awaiting::Expression);
                Ok(Reply::PromptExpression)
            }
            ("add", expr) => add(store, subscriber, expr).await,
            ("remove", "") => Ok(Reply::List(subscription::list(store, subscriber).await?)),
            ("remove", expr) => match subscription::unregister(store, subscriber, expr).await {
                Ok(expr) => Ok(Reply::Removed(expr)),
                Err(SubscriptionError::NotFound(expr)) => Ok(Reply::NotRegistered(expr)),
                Err(e) => Err(e.into()),
            },
            ("list", _) => Ok(Reply::List(subscription::list(store, subscriber).await?)),
            ("clear", _) => Ok(Reply::Cleared(
                subscription::unregister_all(store, subscriber).await?,
            )),
            ("quiet", "") => {
                self.set(subscriber, Awaiting::QuietStart);
                Ok(Reply::PromptQuietStart)
            }
            ("quiet", "off") => {
                if store.set_quiet_enabled(subscriber, false).await? {
                    Ok(Reply::QuietDisabled)
                } else {
                    Ok(Reply::NoQuietWindow)
                }
            }
            ("quiet", "on") => {
                if store.set_quiet_enabled(subscriber, true).await? {
                    match store.quiet_window(subscriber).await? {
                        Some(window) => Ok(Reply::QuietEnabled(window)),
                        None => Ok(Reply::NoQuietWindow),
                    }
                } else {
                    Ok(Reply::NoQuietWindow)
                }
            }
            ("quiet", range) => {
                let mut parts = range.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(start), Some(end), None) => {
                        match (parse_hhmm(start), parse_hhmm(end)) {
                            (Ok(s), Ok(e)) => set_quiet(store, subscriber, s, e).await,
                            _ => Ok(Reply::InvalidTime(range.to_string())),
                        }
                    }
                    _ => Ok(Reply::InvalidTime(range.to_string())),
                }
            }
            ("check", _) => Ok(Reply::CheckRequested),
            ("cancel", _) => Ok(Reply::Cancelled),
            _ => Ok(Reply::Unknown(format!("/{}", name))),
        }
    }
}

async fn add(store: &dyn Store, subscriber: SubscriberId, text: &str) -> Result<Reply> {
    match subscription::register(store, subscriber, text).await {
        Ok(expr) => Ok(Reply::Added(expr)),
        Err(SubscriptionError::Duplicate(expr)) => Ok(Reply::AlreadyRegistered(expr)),
        Err(SubscriptionError::Invalid(e)) => Ok(Reply::InvalidExpression(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

async fn set_quiet(
    store: &dyn Store,
    subscriber: SubscriberId,
    start: u16,
    end: u16,
) -> Result<Reply> {
    let window = QuietWindow {
        start_minute: start,
        end_minute: end,
        enabled: true,
    };
    store.set_quiet_window(subscriber, window).await?;
    store.clear_blocked(subscriber).await?;
    Ok(Reply::QuietSet(window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn test_add_prompt_then_expression() {
        let store = InMemoryStore::new();
        let mut conv = ConversationState::new();
        assert_eq!(
            conv.handle(&store, 1, "/add").await.unwrap(),
            Reply::PromptExpression
        );
        assert_eq!(conv.awaiting(1), Awaiting::Expression);
        assert_eq!(
            conv.handle(&store, 1, "삼성 OR 애플").await.unwrap(),
            Reply::Added("삼성 OR 애플".into())
        );
        assert_eq!(conv.awaiting(1), Awaiting::Idle);
        // Another subscriber's state is untouched.
        assert_eq!(conv.awaiting(2), Awaiting::Idle);
    }

    #[tokio::test]
    async fn test_invalid_expression_is_reported() {
        let store = InMemoryStore::new();
        let mut conv = ConversationState::new();
        let reply = conv.handle(&store, 1, "/add a AND b OR c").await.unwrap();
        assert!(matches!(reply, Reply::InvalidExpression(_)));
    }

    #[tokio::test]
    async fn test_quiet_dialogue() {
        let store = InMemoryStore::new();
        let mut conv = ConversationState::new();
        conv.handle(&store, 3, "/quiet").await.unwrap();
        assert_eq!(
            conv.handle(&store, 3, "25:00").await.unwrap(),
            Reply::InvalidTime("25:00".into())
        );
        assert_eq!(
            conv.handle(&store, 3, "23:00").await.unwrap(),
            Reply::PromptQuietEnd { start: 23 * 60 }
        );
        let reply = conv.handle(&store, 3, "07:00").await.unwrap();
        assert_eq!(reply, Reply::QuietSet(QuietWindow::parse("23:00", "07:00").unwrap()));
        assert_eq!(conv.handle(&store, 3, "/quiet off").await.unwrap(), Reply::QuietDisabled);
        assert!(!store.quiet_window(3).await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_quiet_inline_and_toggle_without_window() {
        let store = InMemoryStore::new();
        let mut conv = ConversationState::new();
        assert_eq!(conv.handle(&store, 4, "/quiet on").await.unwrap(), Reply::NoQuietWindow);
        let reply = conv.handle(&store, 4, "/quiet 22:30 06:00").await.unwrap();
        assert!(matches!(reply, Reply::QuietSet(_)));
    }

    #[tokio::test]
    async fn test_command_cancels_pending_input() {
        let store = InMemoryStore::new();
        let mut conv = ConversationState::new();
        conv.handle(&store, 1, "/add").await.unwrap();
        assert_eq!(conv.handle(&store, 1, "/cancel").await.unwrap(), Reply::Cancelled);
        assert_eq!(
            conv.handle(&store, 1, "apple").await.unwrap(),
            Reply::Unknown("apple".into())
        );
        assert!(store.subscriptions_for(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = InMemoryStore::new();
        let mut conv = ConversationState::new();
        conv.handle(&store, 1, "/add a").await.unwrap();
        conv.handle(&store, 1, "/add b").await.unwrap();
        assert_eq!(
            conv.handle(&store, 1, "/remove a").await.unwrap(),
            Reply::Removed("a".into())
        );
        assert_eq!(
            conv.handle(&store, 1, "/remove zzz").await.unwrap(),
            Reply::NotRegistered("zzz".into())
        );
        assert_eq!(conv.handle(&store, 1, "/clear").await.unwrap(), Reply::Cleared(1));
    }
}
