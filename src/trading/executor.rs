//! Trade execution through the external stake tool.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::api::{Notifier, StakeTool};
use crate::db::Database;
use crate::metrics::signed4;
use crate::models::{StakeAction, TradeIntent, TradeRecord};

/// Result of one execution attempt. Failures are never retried.
#[derive(Debug)]
pub enum ExecutionOutcome {
    DryRun,
    Executed(TradeRecord),
    /// Tool reported failure; already logged
    Failed,
}

/// Runs approved intents and records the ones that succeed.
pub struct TradeExecutor {
    tool: Arc<dyn StakeTool>,
    db: Database,
    notifier: Notifier,
    dry_run: bool,
}

impl TradeExecutor {
    pub fn new(tool: Arc<dyn StakeTool>, db: Database, notifier: Notifier, dry_run: bool) -> Self {
        Self {
            tool,
            db,
            notifier,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Execute an intent approved at wallet balance `balance`.
    pub async fn execute(&self, intent: &TradeIntent, balance: Decimal) -> ExecutionOutcome {
        if self.dry_run {
            info!(
                "[DRY RUN] Would {} {:.4} on partition {} (mirroring {} Δ{})",
                intent.action.as_str().to_uppercase(),
                intent.amount,
                intent.partition,
                intent.account,
                signed4(intent.origin.delta)
            );
            return ExecutionOutcome::DryRun;
        }

        if let Err(e) = self
            .tool
            .stake(intent.action, intent.partition, intent.amount)
            .await
        {
            warn!(
                action = intent.action.as_str(),
                partition = intent.partition,
                amount = %intent.amount,
                error = %e,
                "Trade failed, intent dropped"
            );
            return ExecutionOutcome::Failed;
        }

        let record = TradeRecord::from_intent(intent, balance);
        let marker = match record.action {
            StakeAction::Add => "🟢",
            StakeAction::Remove => "🔴",
        };
        info!(
            "{} {} {:.4} on partition {} (mirroring {} Δ{})",
            marker,
            record.action.as_str().to_uppercase(),
            record.amount,
            record.partition,
            record.account,
            signed4(record.delta)
        );

        if let Err(e) = self.db.append_trade(&record).await {
            error!(trade_id = %record.id, error = %e, "Failed to append trade to ledger");
        }
        self.notifier.trade_alert(&record).await;

        ExecutionOutcome::Executed(record)
    }
}
