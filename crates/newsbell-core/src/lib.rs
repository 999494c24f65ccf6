//! # Newsbell Core
//!
//! Runtime-agnostic logic for Newsbell: keyword expressions, near-duplicate
//! clustering, fetch planning and proportional allocation, the delivery
//! ledger, the retrying dispatcher, quiet windows, and the threshold alert
//! state machine.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Everything
//! that touches the outside world goes through the collaborator traits in
//! [`traits`] and the [`store::Store`] abstraction, so the whole matching
//! and delivery engine can be driven in tests with in-memory fakes.

pub mod alert;
pub mod clock;
pub mod cluster;
pub mod conversation;
pub mod dispatch;
pub mod expression;
pub mod ledger;
pub mod models;
pub mod plan;
pub mod quiet;
pub mod retry;
pub mod store;
pub mod subscription;
pub mod traits;
