//! Ledger gateway client for the reconciliation (poll) channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::models::Partition;

use super::types::{RpcRequest, RpcResponse, StakeTableResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const METHOD_PARTITION_COUNT: &str = "stake_partitionCount";
pub const METHOD_PARTITION_TABLE: &str = "stake_partitionTable";

/// Read access to ledger stake tables.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Number of partitions; partitions are numbered `0..count`.
    async fn partition_count(&self) -> Result<Partition>;

    /// Full stake table of one partition.
    async fn stake_table(&self, partition: Partition) -> Result<StakeTableResponse>;
}

/// JSON-RPC over HTTP client for the ledger gateway.
pub struct RpcLedgerClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);

        debug!(url = %self.url, method = %method, id = id, "Ledger RPC call");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", method))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} request failed: {} - {}", method, status, body);
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        if let Some(err) = body.error {
            anyhow::bail!("{} returned error {}: {}", method, err.code, err.message);
        }

        body.result
            .with_context(|| format!("{} returned no result", method))
    }
}

#[async_trait]
impl LedgerSource for RpcLedgerClient {
    async fn partition_count(&self) -> Result<Partition> {
        self.call(METHOD_PARTITION_COUNT, json!([])).await
    }

    async fn stake_table(&self, partition: Partition) -> Result<StakeTableResponse> {
        self.call(METHOD_PARTITION_TABLE, json!([partition])).await
    }
}
