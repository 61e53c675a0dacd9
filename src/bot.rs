//! Bot runner: wires the producers to the engine and runs until shutdown.
//!
//! Handles:
//! - Push subscription to ledger stake events
//! - Timed reconciliation of every partition's stake table
//! - Summary reports at 00:00 UTC (and optionally at startup)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::{CliStakeTool, EventSubscriber, LedgerSource, Notifier, RpcLedgerClient, StakeTool};
use crate::db::{BaselineStore, Database};
use crate::metrics::until_next_utc_midnight;
use crate::models::StakeObservation;
use crate::trading::{CopyEngine, EngineMessage, MirrorConfig};

/// Engine intake queue depth.
const ENGINE_QUEUE: usize = 1024;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Mirroring configuration
    pub mirror: MirrorConfig,

    /// Baseline state file
    pub state_path: PathBuf,

    /// Database URL
    pub database_url: String,

    /// Log intended trades instead of executing them
    pub dry_run: bool,

    /// Emit one summary immediately at startup
    pub summary_now: bool,
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    db: Database,
    notifier: Notifier,
    ledger: Arc<dyn LedgerSource>,
    tool: Arc<dyn StakeTool>,
}

impl Bot {
    /// Create a new bot instance.
    pub async fn new(config: BotConfig) -> Result<Self> {
        let db = Database::new(&config.database_url).await?;
        let notifier = Notifier::new(
            config.mirror.live_webhook.clone(),
            config.mirror.summary_webhook.clone(),
        )?;
        let ledger = Arc::new(RpcLedgerClient::new(config.mirror.rpc_url.clone())?);
        let tool = Arc::new(CliStakeTool::new(
            config.mirror.tool_path.clone(),
            config.mirror.wallet.clone(),
            config.mirror.network.clone(),
            config.mirror.tool_timeout(),
        ));

        Ok(Self {
            config,
            db,
            notifier,
            ledger,
            tool,
        })
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let mirror = &self.config.mirror;
        info!(
            network = %mirror.network,
            wallet = %mirror.wallet,
            accounts = mirror.accounts.len(),
            mode = mirror.sizing_mode.as_str(),
            poll_interval = mirror.poll_interval_secs,
            dry_run = self.config.dry_run,
            "Starting stake mirror"
        );

        let (tx, rx) = mpsc::channel(ENGINE_QUEUE);

        let engine = CopyEngine::new(
            mirror,
            BaselineStore::new(&self.config.state_path),
            self.db.clone(),
            self.tool.clone(),
            self.notifier.clone(),
            self.config.dry_run,
        )?;
        let mut engine_task = tokio::spawn(engine.run(rx));

        self.notifier
            .summary_text("⏰ Summary set to post at **00:00 UTC**.")
            .await;
        if self.config.summary_now {
            tx.send(EngineMessage::Summary)
                .await
                .context("Engine stopped before startup summary")?;
        }

        let push_task = tokio::spawn(
            EventSubscriber::new(
                mirror.endpoints.clone(),
                mirror.account_ids(),
                tx.clone(),
                self.notifier.clone(),
            )
            .run(),
        );

        let poll_task = tokio::spawn(poll_loop(
            self.ledger.clone(),
            mirror.account_ids(),
            mirror.poll_interval(),
            tx.clone(),
            self.notifier.clone(),
        ));

        let summary_task = tokio::spawn(summary_scheduler(tx));

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
            res = &mut engine_task => warn!(result = ?res, "Engine task exited"),
        }

        push_task.abort();
        poll_task.abort();
        summary_task.abort();
        engine_task.abort();

        info!("Stake mirror stopped");
        Ok(())
    }
}

/// One full reconciliation pass: every watched account present in every
/// partition's stake table becomes a total-stake observation.
pub async fn reconcile(
    ledger: &dyn LedgerSource,
    watched: &[String],
    tx: &mpsc::Sender<EngineMessage>,
) -> Result<usize> {
    let count = ledger.partition_count().await?;
    let mut sent = 0;

    for partition in 0..count {
        let table = ledger
            .stake_table(partition)
            .await
            .with_context(|| format!("Failed to fetch stake table for partition {}", partition))?;

        if table.is_empty() {
            continue;
        }

        for account in watched {
            let Some(amount) = table.stake_of(account) else {
                continue;
            };

            tx.send(EngineMessage::Observation(StakeObservation::total(
                partition, account, amount,
            )))
            .await
            .context("Engine stopped")?;
            sent += 1;
        }
    }

    debug!(partitions = count, observations = sent, "Reconciliation pass complete");
    Ok(sent)
}

/// Reconcile on a fixed interval; failures are reported and retried next tick.
async fn poll_loop(
    ledger: Arc<dyn LedgerSource>,
    watched: Vec<String>,
    period: std::time::Duration,
    tx: mpsc::Sender<EngineMessage>,
    notifier: Notifier,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if let Err(e) = reconcile(ledger.as_ref(), &watched, &tx).await {
            if tx.is_closed() {
                return;
            }
            error!(error = %e, "Reconciliation failed");
            notifier
                .live_text(&format!("⚠️ stakemirror error: `{:#}`", e))
                .await;
        }
    }
}

/// Ask the engine for a summary at every UTC midnight.
async fn summary_scheduler(tx: mpsc::Sender<EngineMessage>) {
    loop {
        let wait = until_next_utc_midnight(Utc::now());
        info!(in_secs = wait.as_secs(), "Next summary scheduled (00:00 UTC)");
        tokio::time::sleep(wait).await;

        if tx.send(EngineMessage::Summary).await.is_err() {
            return;
        }
    }
}
