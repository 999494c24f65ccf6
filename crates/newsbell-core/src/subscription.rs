//! Registering and removing keyword expressions.
//!
//! Expressions are validated here, once, and stored in canonical form
//! (see [`Expression`]'s `Display`), so `a   AND b` and `a AND b` are the
//! same subscription. Any successful registration change also clears the
//! subscriber's blocked flag: interacting again means they can be reached.

use thiserror::Error;
use tracing::info;

use crate::expression::{Expression, ExpressionError};
use crate::models::SubscriberId;
use crate::store::Store;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Invalid(#[from] ExpressionError),
    #[error("'{0}' is already registered")]
    Duplicate(String),
    #[error("'{0}' is not registered")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

fn canonical(text: &str) -> Result<String, ExpressionError> {
    Ok(Expression::parse(text)?.to_string())
}

/// Validate and store `text`, returning the canonical expression.
pub async fn register(
    store: &dyn Store,
    subscriber: SubscriberId,
    text: &str,
) -> Result<String, SubscriptionError> {
    let expression = canonical(text)?;
    if !store.add_subscription(subscriber, &expression).await? {
        return Err(SubscriptionError::Duplicate(expression));
    }
    store.clear_blocked(subscriber).await?;
    info!(subscriber, expression = %expression, "subscription added");
    Ok(expression)
}

/// Remove one expression. `text` may be in any spacing the parser accepts.
pub async fn unregister(
    store: &dyn Store,
    subscriber: SubscriberId,
    text: &str,
) -> Result<String, SubscriptionError> {
    let expression = canonical(text).unwrap_or_else(|_| text.trim().to_string());
    if !store.remove_subscription(subscriber, &expression).await? {
        return Err(SubscriptionError::NotFound(expression));
    }
    store.clear_blocked(subscriber).await?;
    info!(subscriber, expression = %expression, "subscription removed");
    Ok(expression)
}

/// Remove every expression of `subscriber`, returning how many were removed.
pub async fn unregister_all(
    store: &dyn Store,
    subscriber: SubscriberId,
) -> Result<u64, SubscriptionError> {
    let removed = store.remove_all_subscriptions(subscriber).await?;
    store.clear_blocked(subscriber).await?;
    info!(subscriber, removed, "subscriptions cleared");
    Ok(removed)
}

pub async fn list(
    store: &dyn Store,
    subscriber: SubscriberId,
) -> Result<Vec<String>, SubscriptionError> {
    Ok(store.subscriptions_for(subscriber).await?)
}
