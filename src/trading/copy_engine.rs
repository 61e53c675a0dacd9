//! Copy-trading engine: the single owner of mirroring state.
//!
//! Producers only send [`EngineMessage`]s; the engine runs detection,
//! sizing, the safety governor and execution serially, one message at a
//! time, so baseline, pause state and summary window are never shared.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{Notifier, StakeTool};
use crate::db::{BaselineStore, Database};
use crate::metrics::{signed4, SummaryReport, SummaryWindow};
use crate::models::{StakeBaseline, StakeObservation};

use super::{
    ChangeDetector, Detection, ExecutionOutcome, MirrorConfig, PauseState, PositionSizer,
    SafetyGovernor, TradeExecutor, Transition,
};

/// Work items for the engine task.
#[derive(Debug)]
pub enum EngineMessage {
    /// A stake reading from either channel
    Observation(StakeObservation),
    /// Emit a summary report and start a new window
    Summary,
}

/// What happened to one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Baseline,
    Noise,
    /// Already mirrored from the other channel
    Duplicate,
    Untracked,
    /// Sized to a non-positive amount
    Ignored,
    /// Rejected by the safety governor
    Dropped,
    DryRun,
    Executed,
    Failed,
}

/// Copy-trading engine state.
pub struct CopyEngine {
    detector: ChangeDetector,
    sizer: PositionSizer,
    governor: SafetyGovernor,
    executor: TradeExecutor,
    window: SummaryWindow,
    store: BaselineStore,
    db: Database,
    notifier: Notifier,
    tool: Arc<dyn StakeTool>,
    weights: HashMap<String, Decimal>,
}

impl CopyEngine {
    /// Create an engine, restoring the baseline from `store`.
    pub fn new(
        config: &MirrorConfig,
        store: BaselineStore,
        db: Database,
        tool: Arc<dyn StakeTool>,
        notifier: Notifier,
        dry_run: bool,
    ) -> Result<Self> {
        let baseline = store.load();
        info!(
            tracked = baseline.len(),
            path = %store.path().display(),
            "Baseline loaded"
        );

        let governor = SafetyGovernor::new(config.low_balance, config.resume_balance)?;
        let executor = TradeExecutor::new(tool.clone(), db.clone(), notifier.clone(), dry_run);

        Ok(Self {
            detector: ChangeDetector::new(baseline, config.noise_epsilon, config.dedup_window()),
            sizer: PositionSizer::from_config(config),
            governor,
            executor,
            window: SummaryWindow::new(Utc::now()),
            store,
            db,
            notifier,
            tool,
            weights: config.weights(),
        })
    }

    pub fn baseline(&self) -> &StakeBaseline {
        self.detector.baseline()
    }

    pub fn pause_state(&self) -> PauseState {
        self.governor.state()
    }

    pub fn window(&self) -> &SummaryWindow {
        &self.window
    }

    /// Process messages until every producer has hung up.
    pub async fn run(mut self, mut rx: mpsc::Receiver<EngineMessage>) {
        info!(dry_run = self.executor.is_dry_run(), "Engine started");

        while let Some(msg) = rx.recv().await {
            let result = match msg {
                EngineMessage::Observation(obs) => self.handle_observation(obs).await.map(|_| ()),
                EngineMessage::Summary => self.emit_summary().await.map(|_| ()),
            };

            if let Err(e) = result {
                error!(error = %e, "Engine error");
                self.notifier
                    .live_text(&format!("⚠️ stakemirror error: `{}`", e))
                    .await;
            }
        }

        info!("Engine stopped");
    }

    /// Run one observation through detection, sizing, governance and execution.
    pub async fn handle_observation(&mut self, obs: StakeObservation) -> Result<Outcome> {
        let detection = self.detector.observe(&obs)?;

        if self.detector.take_dirty() {
            self.store
                .save(self.detector.baseline())
                .context("Failed to persist baseline")?;
        }

        let delta = match detection {
            Detection::Baseline => return Ok(Outcome::Baseline),
            Detection::Noise => return Ok(Outcome::Noise),
            Detection::Duplicate(_) => return Ok(Outcome::Duplicate),
            Detection::Untracked => {
                debug!(
                    partition = obs.partition,
                    account = %obs.account,
                    "Push change without baseline, waiting for reconciliation"
                );
                return Ok(Outcome::Untracked);
            }
            Detection::Change(delta) => delta,
        };

        info!(
            channel = delta.channel.as_str(),
            partition = delta.partition,
            account = %delta.account,
            delta = %signed4(delta.delta),
            "Stake change detected"
        );

        let weight = self
            .weights
            .get(&delta.account)
            .copied()
            .unwrap_or(Decimal::ONE);

        let Some(intent) = self.sizer.intent(&delta, weight)? else {
            debug!(account = %delta.account, weight = %weight, "Sized to zero, no trade");
            return Ok(Outcome::Ignored);
        };

        let balance = self.query_balance().await;
        let decision = self.governor.check(balance);

        if let Some(transition) = decision.transition {
            match transition {
                Transition::Paused { .. } => warn!(balance = %balance, "Mirroring paused"),
                Transition::Resumed { .. } => info!(balance = %balance, "Mirroring resumed"),
            }
            self.notifier.live_text(&transition.to_string()).await;
        }

        if !decision.allowed {
            info!(
                action = intent.action.as_str(),
                partition = intent.partition,
                amount = %intent.amount,
                balance = %balance,
                "Paused, trade intent dropped"
            );
            return Ok(Outcome::Dropped);
        }

        let outcome = match self.executor.execute(&intent, balance).await {
            ExecutionOutcome::DryRun => Outcome::DryRun,
            ExecutionOutcome::Executed(record) => {
                self.window.record(&record);
                Outcome::Executed
            }
            ExecutionOutcome::Failed => Outcome::Failed,
        };

        Ok(outcome)
    }

    /// Report on the current window, remember the balance, start a new window.
    pub async fn emit_summary(&mut self) -> Result<SummaryReport> {
        let now = Utc::now();
        let balance = self.query_balance().await;
        let last = self.db.last_reported_balance().await?;

        let report = self.window().report(balance, last, now);
        self.db.record_balance_report(balance, now).await?;

        info!(report = %report, state = ?self.pause_state(), "Summary report");
        if self.notifier.has_summary_webhook() {
            self.notifier.summary_report(&report).await;
        } else {
            debug!("No summary webhook configured, report logged only");
        }

        self.window.reset(now);
        Ok(report)
    }

    /// Fresh wallet balance; an unreadable balance counts as zero.
    async fn query_balance(&self) -> Decimal {
        match self.tool.wallet_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %e, "Balance query failed, treating balance as 0");
                Decimal::ZERO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::api::ToolError;
    use crate::models::{Partition, StakeAction};
    use crate::trading::{SizingMode, WatchedAccount};

    /// Stand-in for the external tool with a settable balance.
    struct MockTool {
        balance: Mutex<Decimal>,
        fail_stakes: bool,
        stakes: Mutex<Vec<(StakeAction, Partition, Decimal)>>,
        balance_queries: AtomicUsize,
    }

    impl MockTool {
        fn new(balance: Decimal) -> Arc<Self> {
            Arc::new(Self {
                balance: Mutex::new(balance),
                fail_stakes: false,
                stakes: Mutex::new(Vec::new()),
                balance_queries: AtomicUsize::new(0),
            })
        }

        fn failing(balance: Decimal) -> Arc<Self> {
            Arc::new(Self {
                balance: Mutex::new(balance),
                fail_stakes: true,
                stakes: Mutex::new(Vec::new()),
                balance_queries: AtomicUsize::new(0),
            })
        }

        fn set_balance(&self, balance: Decimal) {
            *self.balance.lock().unwrap() = balance;
        }

        fn stake_calls(&self) -> Vec<(StakeAction, Partition, Decimal)> {
            self.stakes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StakeTool for MockTool {
        async fn stake(
            &self,
            action: StakeAction,
            partition: Partition,
            amount: Decimal,
        ) -> Result<(), ToolError> {
            self.stakes.lock().unwrap().push((action, partition, amount));
            if self.fail_stakes {
                return Err(ToolError::Failed {
                    code: Some(1),
                    stderr: "insufficient balance".to_string(),
                });
            }
            Ok(())
        }

        async fn wallet_balance(&self) -> Result<Decimal, ToolError> {
            self.balance_queries.fetch_add(1, Ordering::SeqCst);
            Ok(*self.balance.lock().unwrap())
        }
    }

    fn config(mode: SizingMode) -> MirrorConfig {
        MirrorConfig {
            sizing_mode: mode,
            ..MirrorConfig::new(
                "mirror",
                dec!(0.1),
                vec![
                    WatchedAccount::new("5Fhot", dec!(1)),
                    WatchedAccount::new("5Fhalf", dec!(0.5)),
                ],
            )
        }
    }

    async fn engine_in(
        dir: &tempfile::TempDir,
        config: &MirrorConfig,
        tool: Arc<MockTool>,
        dry_run: bool,
    ) -> CopyEngine {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("ledger.db").display());
        let db = Database::new(&url).await.unwrap();
        let store = BaselineStore::new(dir.path().join("state.json"));
        let notifier = Notifier::new(None, None).unwrap();
        CopyEngine::new(config, store, db, tool, notifier, dry_run).unwrap()
    }

    #[tokio::test]
    async fn test_first_observation_never_trades() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MockTool::new(dec!(10));
        let mut engine = engine_in(&dir, &config(SizingMode::Fixed), tool.clone(), false).await;

        let outcome = engine
            .handle_observation(StakeObservation::total(1, "5Fhot", dec!(100)))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Baseline);
        assert!(tool.stake_calls().is_empty());
        assert_eq!(tool.balance_queries.load(Ordering::SeqCst), 0);
        assert_eq!(engine.baseline().get(1, "5Fhot"), Some(dec!(100)));
    }

    #[tokio::test]
    async fn test_proportional_trade_is_executed_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MockTool::new(dec!(10));
        let mut engine =
            engine_in(&dir, &config(SizingMode::Proportional), tool.clone(), false).await;

        engine
            .handle_observation(StakeObservation::total(4, "5Fhalf", dec!(20)))
            .await
            .unwrap();
        let outcome = engine
            .handle_observation(StakeObservation::total(4, "5Fhalf", dec!(30)))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Executed);
        assert_eq!(tool.stake_calls(), vec![(StakeAction::Add, 4, dec!(5.0))]);
        assert_eq!(engine.window().trades(), 1);
        assert_eq!(engine.window().total_added(), dec!(5.0));

        let stats = engine.db.trade_stats().await.unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.total_added, dec!(5.0));
    }

    #[tokio::test]
    async fn test_pause_drops_intents_until_resume() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MockTool::new(dec!(0.8));
        let mut engine = engine_in(&dir, &config(SizingMode::Fixed), tool.clone(), false).await;

        engine
            .handle_observation(StakeObservation::total(1, "5Fhot", dec!(100)))
            .await
            .unwrap();

        let first = engine
            .handle_observation(StakeObservation::total(1, "5Fhot", dec!(101)))
            .await
            .unwrap();
        assert_eq!(first, Outcome::Dropped);
        assert_eq!(engine.pause_state(), PauseState::Paused);

        tool.set_balance(dec!(1.5));
        let second = engine
            .handle_observation(StakeObservation::total(1, "5Fhot", dec!(102)))
            .await
            .unwrap();
        assert_eq!(second, Outcome::Dropped);
        assert!(tool.stake_calls().is_empty());

        tool.set_balance(dec!(2.5));
        let third = engine
            .handle_observation(StakeObservation::total(1, "5Fhot", dec!(103)))
            .await
            .unwrap();
        assert_eq!(third, Outcome::Executed);
        assert_eq!(engine.pause_state(), PauseState::Active);
        assert_eq!(tool.stake_calls(), vec![(StakeAction::Add, 1, dec!(0.1))]);

        // One balance query per candidate intent
        assert_eq!(tool.balance_queries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dry_run_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MockTool::new(dec!(10));
        let mut engine = engine_in(&dir, &config(SizingMode::Fixed), tool.clone(), true).await;

        engine
            .handle_observation(StakeObservation::total(9, "5Fhot", dec!(50)))
            .await
            .unwrap();
        let outcome = engine
            .handle_observation(StakeObservation::total(9, "5Fhot", dec!(47)))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::DryRun);
        assert!(tool.stake_calls().is_empty());
        assert_eq!(engine.window().trades(), 0);
        assert_eq!(engine.db.trade_stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_failed_trade_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MockTool::failing(dec!(10));
        let mut engine = engine_in(&dir, &config(SizingMode::Fixed), tool.clone(), false).await;

        engine
            .handle_observation(StakeObservation::total(2, "5Fhot", dec!(5)))
            .await
            .unwrap();
        let outcome = engine
            .handle_observation(StakeObservation::total(2, "5Fhot", dec!(4)))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(tool.stake_calls().len(), 1);
        assert_eq!(engine.window().trades(), 0);
        assert_eq!(engine.db.trade_stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_push_then_poll_mirrors_once() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MockTool::new(dec!(10));
        let mut engine = engine_in(&dir, &config(SizingMode::Fixed), tool.clone(), false).await;

        let untracked = engine
            .handle_observation(StakeObservation::change(3, "5Fhot", dec!(1)))
            .await
            .unwrap();
        assert_eq!(untracked, Outcome::Untracked);

        engine
            .handle_observation(StakeObservation::total(3, "5Fhot", dec!(10)))
            .await
            .unwrap();
        let pushed = engine
            .handle_observation(StakeObservation::change(3, "5Fhot", dec!(2)))
            .await
            .unwrap();
        let polled = engine
            .handle_observation(StakeObservation::total(3, "5Fhot", dec!(12)))
            .await
            .unwrap();

        assert_eq!(pushed, Outcome::Executed);
        assert_eq!(polled, Outcome::Duplicate);
        assert_eq!(engine.baseline().get(3, "5Fhot"), Some(dec!(12)));

        let settled = engine
            .handle_observation(StakeObservation::total(3, "5Fhot", dec!(12)))
            .await
            .unwrap();
        assert_eq!(settled, Outcome::Noise);
        assert_eq!(tool.stake_calls(), vec![(StakeAction::Add, 3, dec!(0.1))]);
    }

    #[tokio::test]
    async fn test_poll_then_push_then_poll_mirrors_once() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MockTool::new(dec!(10));
        let mut engine = engine_in(&dir, &config(SizingMode::Fixed), tool.clone(), false).await;

        let mut outcomes = Vec::new();
        for obs in [
            StakeObservation::total(3, "5Fhot", dec!(10)),
            StakeObservation::total(3, "5Fhot", dec!(12)),
            StakeObservation::change(3, "5Fhot", dec!(2)),
            StakeObservation::total(3, "5Fhot", dec!(12)),
        ] {
            outcomes.push(engine.handle_observation(obs).await.unwrap());
        }

        assert_eq!(
            outcomes,
            vec![
                Outcome::Baseline,
                Outcome::Executed,
                Outcome::Duplicate,
                Outcome::Noise
            ]
        );
        assert_eq!(tool.stake_calls(), vec![(StakeAction::Add, 3, dec!(0.1))]);
        assert_eq!(engine.window().trades(), 1);
    }

    #[tokio::test]
    async fn test_identical_total_does_not_rewrite_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MockTool::new(dec!(10));
        let mut engine = engine_in(&dir, &config(SizingMode::Fixed), tool.clone(), false).await;
        let state = dir.path().join("state.json");

        engine
            .handle_observation(StakeObservation::total(1, "5Fhot", dec!(10)))
            .await
            .unwrap();
        assert!(state.exists());

        std::fs::remove_file(&state).unwrap();
        let outcome = engine
            .handle_observation(StakeObservation::total(1, "5Fhot", dec!(10)))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Noise);
        assert!(!state.exists());

        // A pushed change leaves the baseline to the next poll
        engine
            .handle_observation(StakeObservation::change(1, "5Fhot", dec!(1)))
            .await
            .unwrap();
        assert!(!state.exists());

        engine
            .handle_observation(StakeObservation::total(1, "5Fhot", dec!(11)))
            .await
            .unwrap();
        assert!(state.exists());
    }

    #[tokio::test]
    async fn test_oversized_trade_is_an_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MockTool::new(dec!(10));
        let cfg = MirrorConfig {
            accounts: vec![WatchedAccount::new("5Fhot", dec!(4))],
            ..config(SizingMode::Proportional)
        };
        let mut engine = engine_in(&dir, &cfg, tool.clone(), false).await;

        engine
            .handle_observation(StakeObservation::total(1, "5Fhot", Decimal::ZERO))
            .await
            .unwrap();
        let result = engine
            .handle_observation(StakeObservation::total(1, "5Fhot", Decimal::MAX))
            .await;

        assert!(result.is_err());
        assert!(tool.stake_calls().is_empty());
    }

    #[tokio::test]
    async fn test_restart_with_unchanged_stakes_trades_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(SizingMode::Fixed);

        {
            let tool = MockTool::new(dec!(10));
            let mut engine = engine_in(&dir, &cfg, tool.clone(), false).await;
            for (partition, amount) in [(1, dec!(100)), (2, dec!(7.5)), (1, dec!(90))] {
                engine
                    .handle_observation(StakeObservation::total(partition, "5Fhot", amount))
                    .await
                    .unwrap();
            }
            assert_eq!(tool.stake_calls().len(), 1);
        }

        let tool = MockTool::new(dec!(10));
        let mut engine = engine_in(&dir, &cfg, tool.clone(), false).await;
        assert_eq!(engine.baseline().get(1, "5Fhot"), Some(dec!(90)));
        assert_eq!(engine.baseline().get(2, "5Fhot"), Some(dec!(7.5)));

        for (partition, amount) in [(1, dec!(90)), (2, dec!(7.5))] {
            let outcome = engine
                .handle_observation(StakeObservation::total(partition, "5Fhot", amount))
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::Noise);
        }
        assert!(tool.stake_calls().is_empty());
    }

    #[tokio::test]
    async fn test_summary_reports_and_resets_window() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MockTool::new(dec!(10));
        let mut engine = engine_in(&dir, &config(SizingMode::Fixed), tool.clone(), false).await;

        engine
            .handle_observation(StakeObservation::total(1, "5Fhot", dec!(100)))
            .await
            .unwrap();
        engine
            .handle_observation(StakeObservation::total(1, "5Fhot", dec!(95)))
            .await
            .unwrap();

        let first = engine.emit_summary().await.unwrap();
        assert_eq!(first.trades, 1);
        assert_eq!(first.total_removed, dec!(0.1));
        assert_eq!(first.net, dec!(-0.1));
        assert_eq!(first.trend, Decimal::ZERO);

        assert_eq!(engine.window().trades(), 0);
        assert_eq!(engine.window().total_removed(), Decimal::ZERO);
        assert_eq!(engine.window().partitions_touched(), 0);

        tool.set_balance(dec!(11.25));
        let second = engine.emit_summary().await.unwrap();
        assert_eq!(second.trades, 0);
        assert_eq!(second.trend, dec!(1.25));
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MockTool::new(dec!(10));
        let engine = engine_in(&dir, &config(SizingMode::Fixed), tool.clone(), false).await;

        let (tx, rx) = mpsc::channel(8);
        tx.send(EngineMessage::Observation(StakeObservation::total(5, "5Fhot", dec!(1))))
            .await
            .unwrap();
        tx.send(EngineMessage::Observation(StakeObservation::total(5, "5Fhot", dec!(2))))
            .await
            .unwrap();
        tx.send(EngineMessage::Summary).await.unwrap();
        drop(tx);

        engine.run(rx).await;

        assert_eq!(tool.stake_calls(), vec![(StakeAction::Add, 5, dec!(0.1))]);
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("ledger.db").display());
        let db = Database::new(&url).await.unwrap();
        assert_eq!(db.last_reported_balance().await.unwrap(), Some(dec!(10)));
    }
}
