//! Data models for stake observations, deltas and mirrored trades.

mod stake;
mod trade;

pub use stake::{Channel, ObservedStake, Partition, StakeBaseline, StakeDelta, StakeObservation};
pub use trade::{StakeAction, TradeIntent, TradeRecord};
