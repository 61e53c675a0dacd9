//! Mirroring configuration, loaded once at startup.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Default push endpoints: local node first, then the public fallback.
pub const DEFAULT_ENDPOINTS: [&str; 2] = ["ws://127.0.0.1:9944", "wss://finney.subtensor.ai:443"];

/// Changes smaller than this are treated as ledger noise.
pub const DEFAULT_NOISE_EPSILON: Decimal = dec!(0.000000001);

/// Upper bound on the reconciliation interval (one day).
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;

/// How a detected stake change is turned into a trade amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    /// Always trade `fixed_amount`
    Fixed,
    /// Trade `|delta| * weight`
    Proportional,
}

impl SizingMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Some(Self::Fixed),
            "proportional" | "weighted" => Some(Self::Proportional),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizingMode::Fixed => "fixed",
            SizingMode::Proportional => "proportional",
        }
    }
}

/// An account whose stake changes are mirrored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedAccount {
    pub account: String,

    /// Multiplier applied in proportional mode (1.0 = mirror one-to-one)
    #[serde(default = "default_weight")]
    pub weight: Decimal,
}

impl WatchedAccount {
    pub fn new(account: impl Into<String>, weight: Decimal) -> Self {
        Self {
            account: account.into(),
            weight,
        }
    }
}

/// Configuration for the mirroring daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Network passed to the execution tool
    #[serde(default = "default_network")]
    pub network: String,

    /// Our wallet name
    pub wallet: String,

    /// Amount per trade in fixed mode
    pub fixed_amount: Decimal,

    /// Accounts to mirror, with their weights
    pub accounts: Vec<WatchedAccount>,

    /// Seconds between reconciliation passes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_sizing_mode")]
    pub sizing_mode: SizingMode,

    /// Webhook for per-trade alerts and status messages
    #[serde(default)]
    pub live_webhook: Option<String>,

    /// Webhook for the periodic summary
    #[serde(default)]
    pub summary_webhook: Option<String>,

    /// Pause mirroring when the wallet balance drops below this
    #[serde(default = "default_low_balance")]
    pub low_balance: Decimal,

    /// Resume mirroring once the wallet balance is back at or above this
    #[serde(default = "default_resume_balance")]
    pub resume_balance: Decimal,

    /// Path to the external execution tool
    #[serde(default = "default_tool_path")]
    pub tool_path: PathBuf,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Push subscription endpoints, tried in order
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// JSON-RPC endpoint used for reconciliation
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    #[serde(default = "default_noise_epsilon")]
    pub noise_epsilon: Decimal,
}

fn default_weight() -> Decimal {
    Decimal::ONE
}

fn default_network() -> String {
    "finney".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_sizing_mode() -> SizingMode {
    SizingMode::Fixed
}

fn default_low_balance() -> Decimal {
    dec!(1.0)
}

fn default_resume_balance() -> Decimal {
    dec!(2.0)
}

fn default_tool_path() -> PathBuf {
    PathBuf::from("btcli")
}

fn default_tool_timeout() -> u64 {
    120
}

fn default_endpoints() -> Vec<String> {
    DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect()
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:9944".to_string()
}

fn default_noise_epsilon() -> Decimal {
    DEFAULT_NOISE_EPSILON
}

impl MirrorConfig {
    /// Minimal valid configuration; everything else takes its default.
    pub fn new(wallet: impl Into<String>, fixed_amount: Decimal, accounts: Vec<WatchedAccount>) -> Self {
        Self {
            network: default_network(),
            wallet: wallet.into(),
            fixed_amount,
            accounts,
            poll_interval_secs: default_poll_interval(),
            sizing_mode: default_sizing_mode(),
            live_webhook: None,
            summary_webhook: None,
            low_balance: default_low_balance(),
            resume_balance: default_resume_balance(),
            tool_path: default_tool_path(),
            tool_timeout_secs: default_tool_timeout(),
            endpoints: default_endpoints(),
            rpc_url: default_rpc_url(),
            noise_epsilon: default_noise_epsilon(),
        }
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config {} (run `stakemirror setup` first)",
                path.display()
            )
        })?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;

        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    /// Reject configurations the daemon cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.wallet.trim().is_empty(), "wallet must not be empty");
        ensure!(!self.accounts.is_empty(), "at least one watched account is required");

        let mut seen = HashSet::new();
        for watched in &self.accounts {
            ensure!(!watched.account.trim().is_empty(), "watched account must not be empty");
            ensure!(
                seen.insert(watched.account.as_str()),
                "account {} is listed more than once",
                watched.account
            );
            ensure!(
                watched.weight >= Decimal::ZERO,
                "weight for {} must be >= 0, got {}",
                watched.account,
                watched.weight
            );
        }

        if self.sizing_mode == SizingMode::Fixed {
            ensure!(
                self.fixed_amount > Decimal::ZERO,
                "fixed_amount must be > 0 in fixed mode, got {}",
                self.fixed_amount
            );
        }

        ensure!(
            (1..=MAX_POLL_INTERVAL_SECS).contains(&self.poll_interval_secs),
            "poll_interval_secs must be between 1 and {}, got {}",
            MAX_POLL_INTERVAL_SECS,
            self.poll_interval_secs
        );
        ensure!(self.tool_timeout_secs > 0, "tool_timeout_secs must be > 0");
        ensure!(self.noise_epsilon >= Decimal::ZERO, "noise_epsilon must be >= 0");
        ensure!(
            self.resume_balance >= self.low_balance,
            "resume_balance ({}) must be >= low_balance ({})",
            self.resume_balance,
            self.low_balance
        );

        Ok(())
    }

    /// Weight per watched account.
    pub fn weights(&self) -> HashMap<String, Decimal> {
        self.accounts
            .iter()
            .map(|w| (w.account.clone(), w.weight))
            .collect()
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.accounts.iter().map(|w| w.account.clone()).collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// How long a mirrored change suppresses its echo from the other channel.
    ///
    /// Two intervals, so the next full pass has read the key even when
    /// passes run long.
    pub fn dedup_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.poll_interval_secs.min(MAX_POLL_INTERVAL_SECS) as i64 * 2)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}
