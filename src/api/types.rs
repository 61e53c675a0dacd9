//! Wire types for the ledger gateway (JSON-RPC 2.0 over HTTP and WebSocket).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Per-partition stake table as parallel arrays.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StakeTableResponse {
    #[serde(default)]
    pub hotkeys: Vec<String>,
    #[serde(default)]
    pub stake: Vec<Decimal>,
}

impl StakeTableResponse {
    pub fn is_empty(&self) -> bool {
        self.hotkeys.is_empty()
    }

    /// Stake held by `account`, if it appears in the table.
    pub fn stake_of(&self, account: &str) -> Option<Decimal> {
        let idx = self.hotkeys.iter().position(|h| h == account)?;
        self.stake.get(idx).copied()
    }
}

/// Subscription notification pushed over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
pub struct EventNotification {
    pub params: EventParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventParams {
    pub result: LedgerEvent,
}

/// A decoded ledger event.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerEvent {
    pub module_id: String,
    pub event_id: String,
    #[serde(default)]
    pub attributes: Vec<Value>,
}
