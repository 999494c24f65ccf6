//! # newsbell CLI
//!
//! The `newsbell` binary manages subscriptions, runs single cycles for
//! testing, and hosts the long-running daemon.
//!
//! ## Usage
//!
//! ```bash
//! newsbell --config ./config/newsbell.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `newsbell init` | Create the SQLite database and run schema migrations |
//! | `newsbell subscribe add\|remove\|list\|clear` | Manage keyword expressions |
//! | `newsbell quiet set\|off\|on\|show` | Manage quiet hours |
//! | `newsbell check` | Run an on-demand news check for one subscriber |
//! | `newsbell cycle news\|alerts` | Run one scheduled cycle now |
//! | `newsbell report` | Print the index report |
//! | `newsbell stats` | Database statistics |
//! | `newsbell console` | Chat with the command handler on stdin |
//! | `newsbell run` | Run both cycles until Ctrl-C |
//!
//! Secrets are read from `NAVER_CLIENT_ID`, `NAVER_CLIENT_SECRET` and
//! `TELEGRAM_BOT_TOKEN`. Log verbosity follows `-v`/`-q`, or `NEWSBELL_LOG`
//! when set.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use newsbell::config::{self, Config};
use newsbell::engine::Engine;
use newsbell::sqlite_store::SqliteStore;
use newsbell::{alert_cycle, db, format, migrate, news_cycle, scheduler, stats};
use newsbell_core::conversation::{ConversationState, Reply};
use newsbell_core::models::SubscriberId;
use newsbell_core::quiet::QuietWindow;
use newsbell_core::store::Store;
use newsbell_core::subscription::{self, SubscriptionError};

/// newsbell: keyword news alerts and index drawdown notifications.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/newsbell.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "newsbell",
    about = "Keyword news alerts and index drawdown notifications",
    version,
    long_about = "newsbell fetches news for subscriber keyword expressions, collapses near-duplicate \
    articles, delivers each article at most once per expression, and announces index drawdowns \
    level by level, respecting per-subscriber quiet hours."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/newsbell.toml`.
    #[arg(long, global = true, default_value = "./config/newsbell.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running
    /// it multiple times is safe.
    Init,

    /// Manage a subscriber's keyword expressions.
    Subscribe {
        #[command(subcommand)]
        action: SubscribeAction,
    },

    /// Manage a subscriber's quiet hours.
    Quiet {
        #[command(subcommand)]
        action: QuietAction,
    },

    /// Check one subscriber's expressions now.
    ///
    /// Ignores quiet hours and pads thin results with already-seen
    /// articles. Messages go through the configured transport.
    Check {
        #[arg(long, allow_negative_numbers = true)]
        subscriber: SubscriberId,
    },

    /// Run one scheduled cycle immediately.
    Cycle {
        #[command(subcommand)]
        cycle: CycleKind,
    },

    /// Print the index report (current price, peak, drawdown, scenarios).
    Report,

    /// Show database statistics.
    Stats,

    /// Talk to the command handler from stdin as one subscriber.
    ///
    /// Accepts the same messages as the chat bot (`/add`, `/list`,
    /// `/quiet`, `/check`, …). Replies and news go to stdout.
    Console {
        #[arg(long, allow_negative_numbers = true, default_value_t = 1)]
        subscriber: SubscriberId,
    },

    /// Run the news and alert cycles until interrupted.
    Run,
}

#[derive(Subcommand)]
enum SubscribeAction {
    /// Register an expression, e.g. `"삼성 AND 전자"`.
    Add {
        expression: String,
        #[arg(long, allow_negative_numbers = true)]
        subscriber: SubscriberId,
    },
    /// Remove one expression.
    Remove {
        expression: String,
        #[arg(long, allow_negative_numbers = true)]
        subscriber: SubscriberId,
    },
    /// List a subscriber's expressions.
    List {
        #[arg(long, allow_negative_numbers = true)]
        subscriber: SubscriberId,
    },
    /// Remove every expression of a subscriber.
    Clear {
        #[arg(long, allow_negative_numbers = true)]
        subscriber: SubscriberId,
    },
}

#[derive(Subcommand)]
enum QuietAction {
    /// Set and enable the quiet window (`HH:MM HH:MM`, may wrap midnight).
    Set {
        start: String,
        end: String,
        #[arg(long, allow_negative_numbers = true)]
        subscriber: SubscriberId,
    },
    /// Disable the quiet window, keeping its times.
    Off {
        #[arg(long, allow_negative_numbers = true)]
        subscriber: SubscriberId,
    },
    /// Re-enable a previously set window.
    On {
        #[arg(long, allow_negative_numbers = true)]
        subscriber: SubscriberId,
    },
    /// Show the quiet window.
    Show {
        #[arg(long, allow_negative_numbers = true)]
        subscriber: SubscriberId,
    },
}

#[derive(Subcommand)]
enum CycleKind {
    /// Fetch, match and deliver news for every subscription.
    News,
    /// Evaluate the index and send or defer drop alerts.
    Alerts,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("NEWSBELL_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

async fn open_store(cfg: &Config) -> Result<SqliteStore> {
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    Ok(SqliteStore::new(pool))
}

async fn run_subscribe(cfg: &Config, action: SubscribeAction) -> Result<()> {
    let store = open_store(cfg).await?;
    match action {
        SubscribeAction::Add {
            expression,
            subscriber,
        } => match subscription::register(&store, subscriber, &expression).await {
            Ok(expr) => println!("Added: {}", expr),
            Err(SubscriptionError::Duplicate(expr)) => println!("Already registered: {}", expr),
            Err(SubscriptionError::Invalid(e)) => bail!("Invalid expression: {}", e),
            Err(e) => return Err(e.into()),
        },
        SubscribeAction::Remove {
            expression,
            subscriber,
        } => match subscription::unregister(&store, subscriber, &expression).await {
            Ok(expr) => println!("Removed: {}", expr),
            Err(SubscriptionError::NotFound(expr)) => bail!("Not registered: {}", expr),
            Err(e) => return Err(e.into()),
        },
        SubscribeAction::List { subscriber } => {
            let exprs = subscription::list(&store, subscriber).await?;
            if exprs.is_empty() {
                println!("No expressions registered.");
            }
            for (i, expr) in exprs.iter().enumerate() {
                println!("{:>3}. {}", i + 1, expr);
            }
        }
        SubscribeAction::Clear { subscriber } => {
            let removed = subscription::unregister_all(&store, subscriber).await?;
            println!("Removed {} expression(s).", removed);
        }
    }
    Ok(())
}

async fn run_quiet(cfg: &Config, action: QuietAction) -> Result<()> {
    let store = open_store(cfg).await?;
    match action {
        QuietAction::Set {
            start,
            end,
            subscriber,
        } => {
            let window = QuietWindow::parse(&start, &end)?;
            store.set_quiet_window(subscriber, window).await?;
            store.clear_blocked(subscriber).await?;
            println!("Quiet hours: {}", window.describe());
        }
        QuietAction::Off { subscriber } => {
            if store.set_quiet_enabled(subscriber, false).await? {
                println!("Quiet hours disabled. Deferred alerts go out on the next daemon tick.");
            } else {
                println!("No quiet window set.");
            }
        }
        QuietAction::On { subscriber } => {
            if store.set_quiet_enabled(subscriber, true).await? {
                println!("Quiet hours enabled.");
            } else {
                println!("No quiet window set.");
            }
        }
        QuietAction::Show { subscriber } => match store.quiet_window(subscriber).await? {
            Some(w) => println!(
                "Quiet hours: {} ({})",
                w.describe(),
                if w.enabled { "enabled" } else { "disabled" }
            ),
            None => println!("No quiet window set."),
        },
    }
    Ok(())
}

/// Stdin conversation loop. The engine (which needs API credentials) is
/// only built once a message requires it.
async fn run_console(mut cfg: Config, subscriber: SubscriberId) -> Result<()> {
    cfg.dispatch.transport = "console".to_string();
    let interval = cfg.news.interval_minutes;
    let store = open_store(&cfg).await?;
    let mut conversation = ConversationState::new();
    let mut engine: Option<Engine> = None;

    println!("{}", format::help(interval));
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = conversation.handle(&store, subscriber, &line).await?;
        println!("{}\n", format::reply(&reply, interval));

        if matches!(reply, Reply::CheckRequested | Reply::QuietDisabled) {
            if engine.is_none() {
                engine = Some(Engine::from_config(cfg.clone()).await?);
            }
            if let Some(engine) = engine.as_ref() {
                if reply == Reply::CheckRequested {
                    news_cycle::run_manual_check(engine, subscriber).await?;
                } else {
                    alert_cycle::flush_pending(engine, subscriber).await?;
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Subscribe { action } => run_subscribe(&cfg, action).await?,
        Commands::Quiet { action } => run_quiet(&cfg, action).await?,
        Commands::Check { subscriber } => {
            let engine = Engine::from_config(cfg).await?;
            let report = news_cycle::run_manual_check(&engine, subscriber).await?;
            println!(
                "Checked {} expression(s): {} message(s), {} new, {} already seen.",
                report.expressions, report.messages_sent, report.fresh_items, report.backfill_items
            );
        }
        Commands::Cycle { cycle } => {
            let engine = Engine::from_config(cfg).await?;
            match cycle {
                CycleKind::News => {
                    let r = news_cycle::run_news_cycle(&engine).await?;
                    println!(
                        "News cycle: {} subscription(s), {} queries ({} failed), {} items fetched, \
                         {} message(s) sent, {} item(s) delivered, {} quiet, {} blocked, {} pruned.",
                        r.subscriptions,
                        r.queries,
                        r.failed_queries,
                        r.fetched_items,
                        r.messages_sent,
                        r.items_delivered,
                        r.skipped_quiet,
                        r.skipped_blocked,
                        r.pruned
                    );
                }
                CycleKind::Alerts => {
                    let r = alert_cycle::run_alert_cycle(&engine).await?;
                    println!(
                        "Alert cycle: drop {:.2}% (level {}), {} sent, {} deferred, {} flushed, {} failed.",
                        r.drop_pct, r.level, r.sent, r.deferred, r.flushed, r.failed
                    );
                }
            }
        }
        Commands::Report => {
            let engine = Engine::from_config(cfg).await?;
            println!("{}", alert_cycle::report(&engine).await?);
        }
        Commands::Stats => stats::run_stats(&cfg).await?,
        Commands::Console { subscriber } => run_console(cfg, subscriber).await?,
        Commands::Run => {
            let engine = Arc::new(Engine::from_config(cfg).await?);
            scheduler::run_daemon(engine).await?;
        }
    }

    Ok(())
}
