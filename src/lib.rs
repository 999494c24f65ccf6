//! # newsbell
//!
//! Keyword news alerts and index drawdown notifications.
//!
//! Subscribers register boolean keyword expressions (`삼성 AND 전자`,
//! `(애플 OR 구글) AND AI`). A periodic cycle fetches every distinct term
//! once, collapses near-duplicate articles, reconstructs each expression's
//! result set and delivers only what the subscriber has not seen yet. A
//! second cycle watches an index for drawdowns from its peak and announces
//! each whole-percent level once.
//!
//! The matching, deduplication and delivery logic lives in the
//! runtime-agnostic `newsbell-core` crate; this crate provides the
//! configuration, SQLite persistence, HTTP collaborators, cycles and CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Naver news  │──▶│ plan+cluster │──▶│ ledger       │──▶│ Telegram │
//! │ search      │   │ (core)       │   │ (SQLite)     │   │ Bot API  │
//! └─────────────┘   └──────────────┘   └──────────────┘   └────▲─────┘
//!                                                              │
//! ┌─────────────┐   ┌──────────────┐                           │
//! │ Yahoo chart │──▶│ alert state  │──── dispatcher (retry) ───┘
//! │ API         │   │ machine      │
//! └─────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! newsbell init
//! newsbell subscribe add "삼성 OR 애플" --subscriber 12345
//! newsbell quiet set 23:00 07:00 --subscriber 12345
//! newsbell cycle news
//! newsbell run
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` |
//! | [`naver`] | Naver news search provider |
//! | [`transport`] | Telegram and console transports |
//! | [`quotes`] | Yahoo chart quotes and the caching wrapper |
//! | [`engine`] | Collaborator wiring shared by the cycles |
//! | [`format`] | HTML message rendering |
//! | [`news_cycle`] | Scheduled news cycle and manual checks |
//! | [`alert_cycle`] | Threshold alert cycle and deferred alerts |
//! | [`scheduler`] | Long-running daemon |
//! | [`stats`] | Database statistics |

pub mod alert_cycle;
pub mod config;
pub mod db;
pub mod engine;
pub mod format;
pub mod migrate;
pub mod naver;
pub mod news_cycle;
pub mod quotes;
pub mod scheduler;
pub mod sqlite_store;
pub mod stats;
pub mod transport;
