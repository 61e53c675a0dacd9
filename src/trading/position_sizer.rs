//! Position sizing: fixed amount or proportional to the observed change.

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use crate::models::{StakeAction, StakeDelta, TradeIntent};

use super::{MirrorConfig, SizingMode};

/// Maps a detected stake change to the amount we trade.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    mode: SizingMode,
    fixed_amount: Decimal,
}

impl PositionSizer {
    pub fn new(mode: SizingMode, fixed_amount: Decimal) -> Self {
        Self { mode, fixed_amount }
    }

    pub fn from_config(config: &MirrorConfig) -> Self {
        Self::new(config.sizing_mode, config.fixed_amount)
    }

    /// Trade amount for a change of `delta` by an account with `weight`.
    ///
    /// Fixed mode ignores both the sign and the magnitude of `delta`.
    pub fn size(&self, delta: Decimal, weight: Decimal) -> Result<Decimal> {
        match self.mode {
            SizingMode::Fixed => Ok(self.fixed_amount),
            SizingMode::Proportional => delta
                .abs()
                .checked_mul(weight)
                .with_context(|| format!("trade size overflows: |{}| x {}", delta, weight)),
        }
    }

    /// Build a trade intent, or `None` when the sized amount is not positive.
    pub fn intent(&self, delta: &StakeDelta, weight: Decimal) -> Result<Option<TradeIntent>> {
        let amount = self.size(delta.delta, weight)?;
        if amount <= Decimal::ZERO {
            return Ok(None);
        }

        Ok(Some(TradeIntent {
            partition: delta.partition,
            account: delta.account.clone(),
            action: StakeAction::from_delta(delta.delta),
            amount,
            origin: delta.clone(),
        }))
    }
}
