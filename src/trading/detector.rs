//! Stake change detection against the last known baseline.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{Channel, ObservedStake, Partition, StakeBaseline, StakeDelta, StakeObservation};

/// What the detector made of one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// First sighting of the key; stored as baseline, nothing to mirror
    Baseline,
    /// Change below the noise threshold; nothing to mirror
    Noise,
    /// Significant change to mirror
    Change(StakeDelta),
    /// Same change already mirrored from the other channel
    Duplicate(StakeDelta),
    /// Relative change for a key without a baseline; nothing stored
    Untracked,
}

/// A change mirrored recently, kept to suppress its echo on the other channel.
#[derive(Debug, Clone)]
struct MirroredChange {
    partition: Partition,
    account: String,
    delta: Decimal,
    channel: Channel,
    at: DateTime<Utc>,
}

/// Single writer of the last-known-stake baseline.
///
/// Only poll totals move the baseline. Every mirrored change is remembered
/// for `dedup_window`; the same change arriving through the other channel
/// inside that window is reported as a duplicate.
pub struct ChangeDetector {
    baseline: StakeBaseline,
    epsilon: Decimal,
    dedup_window: Duration,
    recent: Vec<MirroredChange>,
    dirty: bool,
}

impl ChangeDetector {
    pub fn new(baseline: StakeBaseline, epsilon: Decimal, dedup_window: Duration) -> Self {
        Self {
            baseline,
            epsilon,
            dedup_window,
            recent: Vec::new(),
            dirty: false,
        }
    }

    pub fn baseline(&self) -> &StakeBaseline {
        &self.baseline
    }

    /// Whether the baseline changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Compare an observation against the baseline.
    pub fn observe(&mut self, obs: &StakeObservation) -> Result<Detection> {
        self.expire(obs.observed_at);
        let last = self.baseline.get(obs.partition, &obs.account);

        let delta = match (obs.stake, last) {
            (ObservedStake::Total(amount), None) => {
                self.store(obs, amount);
                debug!(
                    partition = obs.partition,
                    account = %obs.account,
                    amount = %amount,
                    observed_at = %obs.observed_at,
                    "Baseline recorded"
                );
                return Ok(Detection::Baseline);
            }
            (ObservedStake::Change(_), None) => return Ok(Detection::Untracked),
            (ObservedStake::Total(amount), Some(last)) => {
                let delta = amount
                    .checked_sub(last)
                    .with_context(|| format!("stake delta overflows: {} - {}", amount, last))?;
                if amount != last {
                    self.store(obs, amount);
                }
                delta
            }
            (ObservedStake::Change(change), Some(_)) => change,
        };

        if delta.abs() < self.epsilon {
            return Ok(Detection::Noise);
        }

        let delta = StakeDelta {
            partition: obs.partition,
            account: obs.account.clone(),
            delta,
            channel: obs.channel,
        };

        if self.take_echo(&delta) {
            debug!(
                channel = delta.channel.as_str(),
                partition = delta.partition,
                account = %delta.account,
                delta = %delta.delta,
                "Change already mirrored from the other channel"
            );
            return Ok(Detection::Duplicate(delta));
        }

        self.recent.push(MirroredChange {
            partition: delta.partition,
            account: delta.account.clone(),
            delta: delta.delta,
            channel: delta.channel,
            at: obs.observed_at,
        });

        Ok(Detection::Change(delta))
    }

    fn store(&mut self, obs: &StakeObservation, amount: Decimal) {
        self.baseline.set(obs.partition, &obs.account, amount);
        self.dirty = true;
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        let window = self.dedup_window;
        self.recent.retain(|m| now - m.at <= window);
    }

    /// Consume a matching change seen on the other channel, if any.
    fn take_echo(&mut self, delta: &StakeDelta) -> bool {
        let epsilon = self.epsilon;
        let found = self.recent.iter().position(|m| {
            m.channel != delta.channel
                && m.partition == delta.partition
                && m.account == delta.account
                && (m.delta - delta.delta).abs() < epsilon
        });

        match found {
            Some(i) => {
                self.recent.swap_remove(i);
                true
            }
            None => false,
        }
    }
}
