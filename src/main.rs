//! Stake mirror
//!
//! Watches the stake positions of selected accounts on a proof-of-stake
//! ledger and mirrors every change into your own wallet, with a balance
//! safety governor and daily summary reports.

mod api;
mod bot;
mod db;
mod metrics;
mod models;
mod setup;
mod trading;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::bot::{Bot, BotConfig};
use crate::db::{BaselineStore, Database};
use crate::metrics::signed4;
use crate::trading::MirrorConfig;

/// Proof-of-stake copy-trading daemon CLI.
#[derive(Parser)]
#[command(name = "stakemirror")]
#[command(about = "Mirror the stake moves of watched accounts into your wallet", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "STAKEMIRROR_CONFIG", default_value = "./stakemirror.json")]
    config: PathBuf,

    /// Baseline state file path
    #[arg(short, long, env = "STAKEMIRROR_STATE", default_value = "./stakemirror_state.json")]
    state: PathBuf,

    /// Database file path
    #[arg(short, long, env = "STAKEMIRROR_DATABASE", default_value = "sqlite:./stakemirror.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log file, written alongside stdout
    #[arg(long, env = "STAKEMIRROR_LOG", default_value = "./stakemirror.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive configuration wizard
    Setup,

    /// Start mirroring
    Run {
        /// Log intended trades without executing them
        #[arg(long)]
        dry_run: bool,

        /// Send one summary report immediately at startup
        #[arg(long)]
        summary_now: bool,
    },

    /// Show configuration, tracked stakes and ledger statistics
    Status {
        /// Number of recent trades to show
        #[arg(short, long, default_value = "10")]
        recent: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Held until exit so buffered log lines reach the file
    let _log_guard = init_logging(&cli.log_level, &cli.log_file)?;

    match cli.command {
        Commands::Setup => {
            setup::run_setup(&cli.config, &cli.state, &cli.database).await?;
        }

        Commands::Run {
            dry_run,
            summary_now,
        } => {
            let mirror = MirrorConfig::load(&cli.config)?;

            println!("\n=== Stake Mirror ===");
            println!("Network:        {}", mirror.network);
            println!("Wallet:         {}", mirror.wallet);
            println!("Accounts:       {}", mirror.accounts.len());
            println!("Sizing:         {}", mirror.sizing_mode.as_str());
            println!("Poll interval:  {}s", mirror.poll_interval_secs);
            println!("Mode:           {}", if dry_run { "DRY RUN (no real trades)" } else { "LIVE" });
            println!("\nPress Ctrl+C to stop.\n");

            let bot_config = BotConfig {
                mirror,
                state_path: cli.state.clone(),
                database_url: cli.database.clone(),
                dry_run,
                summary_now,
            };

            let bot = Bot::new(bot_config).await?;
            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }
        }

        Commands::Status { recent } => {
            let config = MirrorConfig::load(&cli.config)?;
            let baseline = BaselineStore::new(&cli.state).load();
            let db = Database::new(&cli.database).await?;

            let stats = db.trade_stats().await?;
            let last_balance = db.last_reported_balance().await?;
            let trades = db.recent_trades(recent).await?;

            info!(config = %cli.config.display(), "Status");

            println!("\n=== Configuration ===");
            println!("Network:          {}", config.network);
            println!("Wallet:           {}", config.wallet);
            println!("Sizing:           {} (fixed amount {})", config.sizing_mode.as_str(), config.fixed_amount);
            println!("Pause / Resume:   {} / {}", config.low_balance, config.resume_balance);
            println!("Live webhook:     {}", if config.live_webhook.is_some() { "set" } else { "none" });
            println!("Summary webhook:  {}", if config.summary_webhook.is_some() { "set" } else { "none" });

            println!("\n=== Watched Accounts ===");
            for watched in &config.accounts {
                println!("  {:<50} weight {}", watched.account, watched.weight);
            }

            println!("\n=== State ===");
            println!("Tracked stakes:   {}", baseline.len());
            println!("Partitions:       {}", baseline.partitions().count());

            println!("\n=== Ledger ===");
            println!("Total Trades:     {}", stats.count);
            println!("Total Staked:     {:.4}", stats.total_added);
            println!("Total Unstaked:   {:.4}", stats.total_removed);
            println!("Net:              {}", signed4(stats.total_added - stats.total_removed));
            match last_balance {
                Some(balance) => println!("Last Balance:     {:.4}", balance),
                None => println!("Last Balance:     never reported"),
            }

            if !trades.is_empty() {
                println!("\n=== Recent Trades ===");
                for t in &trades {
                    println!(
                        "  {} {} {:<6} {:>10} on {:>4}  {} (Δ{})",
                        t.id.get(..8).unwrap_or(&t.id),
                        truncate(&t.timestamp, 19),
                        t.action.to_uppercase(),
                        t.amount,
                        t.partition_id,
                        truncate(&t.account, 16),
                        t.delta
                    );
                }
            }
        }
    }

    Ok(())
}

/// Log to stdout and, without blocking, to `log_file`.
fn init_logging(level: &str, log_file: &Path) -> Result<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));

    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .with_context(|| format!("Log path {} has no file name", log_file.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

/// Truncate a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("5Fhot", 16), "5Fhot");
        assert_eq!(truncate("5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty", 16), "5FHneW46xGXgs...");
    }

    #[test]
    fn test_logs_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("stakemirror.log");

        let guard = init_logging("info", &path).unwrap();
        tracing::warn!("balance query failed");
        drop(guard);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("balance query failed"));
    }
}
