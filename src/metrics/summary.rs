//! Per-window trade counters and the periodic summary report.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::models::{Partition, StakeAction, TradeRecord};

/// Balance moves smaller than this are reported as "no change".
const TREND_EPSILON: Decimal = rust_decimal_macros::dec!(0.000000001);

/// Format with an explicit sign and four decimals, e.g. `+2.5000`.
pub fn signed4(value: Decimal) -> String {
    if value.is_sign_negative() && !value.is_zero() {
        format!("{:.4}", value)
    } else {
        format!("+{:.4}", value.abs())
    }
}

/// Counters for the current reporting window.
#[derive(Debug, Clone)]
pub struct SummaryWindow {
    trades: u64,
    total_added: Decimal,
    total_removed: Decimal,
    partitions: BTreeSet<Partition>,
    started_at: DateTime<Utc>,
}

impl SummaryWindow {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            trades: 0,
            total_added: Decimal::ZERO,
            total_removed: Decimal::ZERO,
            partitions: BTreeSet::new(),
            started_at,
        }
    }

    /// Count an executed trade.
    pub fn record(&mut self, trade: &TradeRecord) {
        self.trades += 1;
        self.partitions.insert(trade.partition);
        match trade.action {
            StakeAction::Add => self.total_added += trade.amount,
            StakeAction::Remove => self.total_removed += trade.amount,
        }
    }

    /// Start a fresh window.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        *self = Self::new(now);
    }

    pub fn trades(&self) -> u64 {
        self.trades
    }

    pub fn total_added(&self) -> Decimal {
        self.total_added
    }

    pub fn total_removed(&self) -> Decimal {
        self.total_removed
    }

    pub fn partitions_touched(&self) -> usize {
        self.partitions.len()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Build the report for this window.
    ///
    /// `last_balance` is the balance of the previous report; without one the
    /// trend is zero.
    pub fn report(
        &self,
        balance: Decimal,
        last_balance: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> SummaryReport {
        SummaryReport {
            window_start: self.started_at,
            generated_at: now,
            trades: self.trades,
            partitions_touched: self.partitions.len(),
            total_added: self.total_added,
            total_removed: self.total_removed,
            net: self.total_added - self.total_removed,
            balance,
            trend: last_balance.map_or(Decimal::ZERO, |last| balance - last),
        }
    }
}

/// Direction of the balance since the previous report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

/// A finished summary, ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub window_start: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub trades: u64,
    pub partitions_touched: usize,
    pub total_added: Decimal,
    pub total_removed: Decimal,
    pub net: Decimal,
    pub balance: Decimal,
    pub trend: Decimal,
}

impl SummaryReport {
    pub fn trend_direction(&self) -> Trend {
        if self.trend.abs() < TREND_EPSILON {
            Trend::Flat
        } else if self.trend > Decimal::ZERO {
            Trend::Up
        } else {
            Trend::Down
        }
    }

    /// Short human form of the trend, e.g. `📈 +1.2500`.
    pub fn trend_line(&self) -> String {
        match self.trend_direction() {
            Trend::Flat => "⚪ no change".to_string(),
            Trend::Up => format!("📈 {}", signed4(self.trend)),
            Trend::Down => format!("📉 {}", signed4(self.trend)),
        }
    }
}

impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trades={} partitions={} added={:.4} removed={:.4} net={} balance={:.4} trend={}",
            self.trades,
            self.partitions_touched,
            self.total_added,
            self.total_removed,
            signed4(self.net),
            self.balance,
            signed4(self.trend)
        )
    }
}

/// Time left until the next 00:00 UTC, never less than one second.
pub fn until_next_utc_midnight(now: DateTime<Utc>) -> Duration {
    let next_day = now
        .date_naive()
        .succ_opt()
        .unwrap_or_else(|| now.date_naive());
    let midnight = Utc.from_utc_datetime(&next_day.and_time(NaiveTime::MIN));

    (midnight - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .max(Duration::from_secs(1))
}
