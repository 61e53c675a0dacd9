//! Discord-style webhook notifications.
//!
//! Delivery is best effort: failures are logged and never reach the caller.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::metrics::{signed4, SummaryReport};
use crate::models::{StakeAction, TradeRecord};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(8);
const FOOTER_NAME: &str = "stakemirror";

const COLOR_ADD: u32 = 0x00FF00;
const COLOR_REMOVE: u32 = 0xFF0000;
const COLOR_SUMMARY: u32 = 0x2B6CB0;

/// Posts alerts to the live and summary webhooks, when configured.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    live_webhook: Option<String>,
    summary_webhook: Option<String>,
}

impl Notifier {
    pub fn new(live_webhook: Option<String>, summary_webhook: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("Failed to create webhook client")?;

        Ok(Self {
            client,
            live_webhook: live_webhook.filter(|u| !u.trim().is_empty()),
            summary_webhook: summary_webhook.filter(|u| !u.trim().is_empty()),
        })
    }

    pub fn has_summary_webhook(&self) -> bool {
        self.summary_webhook.is_some()
    }

    /// Plain message to the live channel.
    pub async fn live_text(&self, content: &str) {
        if let Some(url) = &self.live_webhook {
            self.deliver(url, &json!({ "content": content })).await;
        }
    }

    /// Plain message to the summary channel.
    pub async fn summary_text(&self, content: &str) {
        if let Some(url) = &self.summary_webhook {
            self.deliver(url, &json!({ "content": content })).await;
        }
    }

    /// Per-trade alert to the live channel.
    pub async fn trade_alert(&self, trade: &TradeRecord) {
        if let Some(url) = &self.live_webhook {
            self.deliver(url, &json!({ "embeds": [trade_embed(trade)] })).await;
        }
    }

    /// Summary report to the summary channel.
    pub async fn summary_report(&self, report: &SummaryReport) {
        if let Some(url) = &self.summary_webhook {
            self.deliver(url, &json!({ "embeds": [summary_embed(report)] })).await;
        }
    }

    async fn deliver(&self, url: &str, payload: &Value) {
        if let Err(e) = self.post(url, payload).await {
            warn!(error = %e, "Webhook delivery failed");
        }
    }

    async fn post(&self, url: &str, payload: &Value) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .context("Webhook request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook returned {} - {}", status, body);
        }

        debug!("Webhook delivered");
        Ok(())
    }
}

fn footer(prefix: &str) -> Value {
    json!({
        "text": format!("{}{} | {}", prefix, Utc::now().format("%Y-%m-%d %H:%M:%S UTC"), FOOTER_NAME)
    })
}

/// Embed describing one executed trade.
pub fn trade_embed(trade: &TradeRecord) -> Value {
    let (title, color) = match trade.action {
        StakeAction::Add => ("🕯️ Stake Added", COLOR_ADD),
        StakeAction::Remove => ("🕯️ Stake Removed", COLOR_REMOVE),
    };

    json!({
        "title": title,
        "description": format!(
            "**Partition:** `{}`\n**Account:** `{}`\n**Change Detected:** `{}`\n**Mirrored Amount:** `{:.4}`",
            trade.partition,
            trade.account,
            signed4(trade.delta),
            trade.amount
        ),
        "color": color,
        "timestamp": trade.timestamp.to_rfc3339(),
        "footer": footer(""),
    })
}

/// Embed for the periodic summary.
pub fn summary_embed(report: &SummaryReport) -> Value {
    let net_line = if report.net >= rust_decimal::Decimal::ZERO {
        format!("🟩 **Net Gain:** `{}`", signed4(report.net))
    } else {
        format!("🟥 **Net Loss:** `{}`", signed4(report.net))
    };

    json!({
        "title": "📊 Summary",
        "description": format!(
            "**Total Trades:** {}\n**Partitions Touched:** {}\n**Total Staked:** `{:.4}`\n**Total Unstaked:** `{:.4}`\n{}\n\n💰 **Wallet Balance:** `{:.4}` ({} since last report)",
            report.trades,
            report.partitions_touched,
            report.total_added,
            report.total_removed,
            net_line,
            report.balance,
            report.trend_line()
        ),
        "color": COLOR_SUMMARY,
        "timestamp": report.generated_at.to_rfc3339(),
        "footer": footer("Report generated "),
    })
}
