//! Trade intents and the persisted trade record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::stake::{Partition, StakeDelta};

/// Direction of a mirrored stake move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StakeAction {
    Add,
    Remove,
}

impl StakeAction {
    /// Action that mirrors a stake change of the given sign.
    pub fn from_delta(delta: Decimal) -> Self {
        if delta > Decimal::ZERO {
            StakeAction::Add
        } else {
            StakeAction::Remove
        }
    }

    /// Verb as understood by the execution tool.
    pub fn as_str(&self) -> &'static str {
        match self {
            StakeAction::Add => "add",
            StakeAction::Remove => "remove",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            _ => None,
        }
    }
}

/// A sized trade waiting for the safety governor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeIntent {
    pub partition: Partition,
    pub account: String,
    pub action: StakeAction,
    /// Amount to stake or unstake in our wallet (always > 0)
    pub amount: Decimal,
    /// The observed change being mirrored
    pub origin: StakeDelta,
}

/// Row appended to the trade ledger for every executed intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: StakeAction,
    pub partition: Partition,
    pub account: String,
    pub amount: Decimal,
    pub delta: Decimal,
    /// Wallet balance queried just before execution
    pub balance: Decimal,
}

impl TradeRecord {
    pub fn from_intent(intent: &TradeIntent, balance: Decimal) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: intent.action,
            partition: intent.partition,
            account: intent.account.clone(),
            amount: intent.amount,
            delta: intent.origin.delta,
            balance,
        }
    }
}
