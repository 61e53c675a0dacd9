//! External boundaries: ledger gateway, execution tool and webhooks.

mod balance;
mod event_stream;
mod ledger_client;
mod stake_cli;
mod types;
mod webhook;

pub use event_stream::EventSubscriber;
pub use ledger_client::{LedgerSource, RpcLedgerClient};
pub use stake_cli::{CliStakeTool, StakeTool};
#[cfg(test)]
pub use stake_cli::ToolError;
pub use types::*;
pub use webhook::Notifier;
