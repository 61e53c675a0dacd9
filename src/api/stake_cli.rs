//! Client for the external stake execution tool.
//!
//! The tool is a blocking CLI. Each call spawns one process with captured
//! output and a hard timeout; the child is killed if the timeout elapses.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::models::{Partition, StakeAction};

use super::balance::{parse_wallet_balance, BalanceParseError};

/// Why a tool invocation did not succeed.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("execution tool not found: {0}")]
    NotFound(PathBuf),

    #[error("execution tool timed out after {0:?}")]
    TimedOut(Duration),

    #[error("execution tool exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("failed to run execution tool: {0}")]
    Io(#[from] io::Error),

    #[error("unreadable balance output: {0}")]
    Balance(#[from] BalanceParseError),
}

/// Operations the mirror needs from the execution tool.
#[async_trait]
pub trait StakeTool: Send + Sync {
    /// Stake or unstake `amount` on `partition` from our wallet.
    async fn stake(
        &self,
        action: StakeAction,
        partition: Partition,
        amount: Decimal,
    ) -> Result<(), ToolError>;

    /// Current total wallet balance.
    async fn wallet_balance(&self) -> Result<Decimal, ToolError>;
}

/// `StakeTool` backed by the real CLI.
pub struct CliStakeTool {
    bin: PathBuf,
    wallet: String,
    network: String,
    timeout: Duration,
}

impl CliStakeTool {
    pub fn new(bin: PathBuf, wallet: String, network: String, timeout: Duration) -> Self {
        Self {
            bin,
            wallet,
            network,
            timeout,
        }
    }

    /// Arguments for a stake command.
    pub fn stake_args(&self, action: StakeAction, partition: Partition, amount: Decimal) -> Vec<String> {
        vec![
            "stake".to_string(),
            action.as_str().to_string(),
            "--netuid".to_string(),
            partition.to_string(),
            "--wallet-name".to_string(),
            self.wallet.clone(),
            "--amount".to_string(),
            format!("{:.4}", amount),
            "--network".to_string(),
            self.network.clone(),
        ]
    }

    /// Arguments for the wallet balance query.
    pub fn balance_args(&self) -> Vec<String> {
        vec![
            "w".to_string(),
            "balance".to_string(),
            "--all".to_string(),
            "--wallet-name".to_string(),
            self.wallet.clone(),
            "--network".to_string(),
            self.network.clone(),
        ]
    }

    /// Run the tool and return its stdout when it exits successfully.
    async fn run(&self, args: &[String]) -> Result<String, ToolError> {
        info!(cmd = %format!("{} {}", self.bin.display(), args.join(" ")), "Running execution tool");

        let child = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ToolError::NotFound(self.bin.clone()),
                _ => ToolError::Io(e),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::TimedOut(self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !stdout.trim().is_empty() {
            debug!(stdout = %stdout.trim(), "Tool stdout");
        }
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "Tool stderr");
        }

        if !output.status.success() {
            return Err(ToolError::Failed {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(stdout)
    }
}

#[async_trait]
impl StakeTool for CliStakeTool {
    async fn stake(
        &self,
        action: StakeAction,
        partition: Partition,
        amount: Decimal,
    ) -> Result<(), ToolError> {
        let args = self.stake_args(action, partition, amount);
        self.run(&args).await.map(|_| ())
    }

    async fn wallet_balance(&self) -> Result<Decimal, ToolError> {
        let args = self.balance_args();
        let stdout = self.run(&args).await?;
        Ok(parse_wallet_balance(&stdout)?)
    }
}
