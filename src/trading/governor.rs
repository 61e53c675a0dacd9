//! Safety governor: pauses mirroring on a low wallet balance, resumes on recovery.

use std::fmt;

use anyhow::{ensure, Result};
use rust_decimal::Decimal;

/// Whether intents may currently execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseState {
    Active,
    Paused,
}

/// A state change worth announcing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Paused { balance: Decimal, threshold: Decimal },
    Resumed { balance: Decimal, threshold: Decimal },
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Paused { balance, threshold } => write!(
                f,
                "⛔ **Paused**: balance {:.4} < {} threshold.",
                balance, threshold
            ),
            Transition::Resumed { balance, threshold } => write!(
                f,
                "✅ **Resumed**: balance {:.4} ≥ {} threshold.",
                balance, threshold
            ),
        }
    }
}

/// Outcome of checking one candidate intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorDecision {
    pub allowed: bool,
    pub transition: Option<Transition>,
}

/// Hysteresis state machine over the live wallet balance.
#[derive(Debug, Clone)]
pub struct SafetyGovernor {
    low_balance: Decimal,
    resume_balance: Decimal,
    state: PauseState,
}

impl SafetyGovernor {
    /// Create an active governor. `resume_balance` must not be below `low_balance`.
    pub fn new(low_balance: Decimal, resume_balance: Decimal) -> Result<Self> {
        ensure!(
            resume_balance >= low_balance,
            "resume threshold {} is below low threshold {}",
            resume_balance,
            low_balance
        );

        Ok(Self {
            low_balance,
            resume_balance,
            state: PauseState::Active,
        })
    }

    pub fn state(&self) -> PauseState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == PauseState::Paused
    }

    /// Apply a freshly queried balance and decide whether the intent may run.
    pub fn check(&mut self, balance: Decimal) -> GovernorDecision {
        match self.state {
            PauseState::Active if balance < self.low_balance => {
                self.state = PauseState::Paused;
                GovernorDecision {
                    allowed: false,
                    transition: Some(Transition::Paused {
                        balance,
                        threshold: self.low_balance,
                    }),
                }
            }
            PauseState::Active => GovernorDecision {
                allowed: true,
                transition: None,
            },
            PauseState::Paused if balance >= self.resume_balance => {
                self.state = PauseState::Active;
                GovernorDecision {
                    allowed: true,
                    transition: Some(Transition::Resumed {
                        balance,
                        threshold: self.resume_balance,
                    }),
                }
            }
            PauseState::Paused => GovernorDecision {
                allowed: false,
                transition: None,
            },
        }
    }
}
