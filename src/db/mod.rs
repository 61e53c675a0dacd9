//! Persistence for the mirror daemon.
//!
//! - Trade ledger and balance reports in SQLite
//! - Last-known-stake baseline in a JSON state file (see [`BaselineStore`])

mod baseline;

pub use baseline::BaselineStore;

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{StakeAction, TradeRecord};

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Stored trade ledger row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: String,
    pub timestamp: String,
    pub action: String,
    pub partition_id: i64,
    pub account: String,
    pub amount: String,
    pub delta: String,
    pub balance: String,
}

/// Lifetime ledger totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeStats {
    pub count: i64,
    pub total_added: Decimal,
    pub total_removed: Decimal,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Trade ledger (append only); amounts kept as decimal text
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                action TEXT NOT NULL,
                partition_id INTEGER NOT NULL,
                account TEXT NOT NULL,
                amount TEXT NOT NULL,
                delta TEXT NOT NULL,
                balance TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Balance at each summary report, for trend calculation
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balance_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                balance TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_partition ON trades(partition_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Trade Ledger ====================

    /// Append one executed trade.
    pub async fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, timestamp, action, partition_id, account, amount, delta, balance)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(trade.timestamp.to_rfc3339())
        .bind(trade.action.as_str())
        .bind(i64::from(trade.partition))
        .bind(&trade.account)
        .bind(trade.amount.to_string())
        .bind(trade.delta.to_string())
        .bind(trade.balance.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to append trade")?;

        Ok(())
    }

    /// Most recent trades, newest first.
    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<StoredTrade>> {
        sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trades")
    }

    /// Trade count and totals over the whole ledger.
    pub async fn trade_stats(&self) -> Result<TradeStats> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT action, amount FROM trades")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch trade totals")?;

        let mut stats = TradeStats {
            count: 0,
            total_added: Decimal::ZERO,
            total_removed: Decimal::ZERO,
        };

        for (action, amount) in rows {
            let amount = Decimal::from_str(&amount)
                .with_context(|| format!("Corrupt amount in ledger: {}", amount))?;
            stats.count += 1;
            match StakeAction::from_str(&action) {
                Some(StakeAction::Add) => stats.total_added += amount,
                Some(StakeAction::Remove) => stats.total_removed += amount,
                None => anyhow::bail!("Corrupt action in ledger: {}", action),
            }
        }

        Ok(stats)
    }

    // ==================== Balance Reports ====================

    /// Remember the balance reported in a summary.
    pub async fn record_balance_report(&self, balance: Decimal, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO balance_reports (timestamp, balance) VALUES (?, ?)")
            .bind(at.to_rfc3339())
            .bind(balance.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to record balance report")?;

        Ok(())
    }

    /// Balance of the most recent summary report, if any.
    pub async fn last_reported_balance(&self) -> Result<Option<Decimal>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT balance FROM balance_reports ORDER BY id DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch last balance report")?;

        row.map(|(balance,)| {
            Decimal::from_str(&balance)
                .with_context(|| format!("Corrupt balance report: {}", balance))
        })
        .transpose()
    }
}
