//! Stake observations, deltas and the last-known-stake baseline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ledger sub-market ("subnet") identifier.
pub type Partition = u16;

/// Which feed produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Live event subscription
    Push,
    /// Timed full reconciliation
    Poll,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Poll => "poll",
        }
    }
}

/// What an observation says about an account's stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedStake {
    /// Full stake as read from a partition's stake table
    Total(Decimal),
    /// Signed change carried by a ledger event
    Change(Decimal),
}

/// A single reading of an account's stake in one partition.
#[derive(Debug, Clone)]
pub struct StakeObservation {
    pub partition: Partition,
    pub account: String,
    pub stake: ObservedStake,
    pub channel: Channel,
    pub observed_at: DateTime<Utc>,
}

impl StakeObservation {
    /// Observation of a full stake value from the poll channel.
    pub fn total(partition: Partition, account: impl Into<String>, amount: Decimal) -> Self {
        Self {
            partition,
            account: account.into(),
            stake: ObservedStake::Total(amount),
            channel: Channel::Poll,
            observed_at: Utc::now(),
        }
    }

    /// Observation of a signed stake change from the push channel.
    pub fn change(partition: Partition, account: impl Into<String>, delta: Decimal) -> Self {
        Self {
            partition,
            account: account.into(),
            stake: ObservedStake::Change(delta),
            channel: Channel::Push,
            observed_at: Utc::now(),
        }
    }
}

/// A significant stake change, ready for sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeDelta {
    pub partition: Partition,
    pub account: String,
    pub delta: Decimal,
    pub channel: Channel,
}

/// Last known stake per (partition, account).
///
/// Ordered maps keep the persisted state file stable between writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StakeBaseline(BTreeMap<Partition, BTreeMap<String, Decimal>>);

impl StakeBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, partition: Partition, account: &str) -> Option<Decimal> {
        self.0.get(&partition).and_then(|m| m.get(account)).copied()
    }

    pub fn set(&mut self, partition: Partition, account: &str, amount: Decimal) {
        self.0
            .entry(partition)
            .or_default()
            .insert(account.to_string(), amount);
    }

    /// Number of tracked (partition, account) keys.
    pub fn len(&self) -> usize {
        self.0.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn partitions(&self) -> impl Iterator<Item = Partition> + '_ {
        self.0.keys().copied()
    }
}
