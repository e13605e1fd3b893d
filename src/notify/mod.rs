//! Notification sinks — where "wallet found" and "batch complete" go.
//!
//! Delivery is fire-and-forget from the dispatcher's point of view:
//! sinks return errors, callers log them and carry on. A failed webhook
//! never aborts a run.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::dispatch::CheckResult;
use crate::pool::registry;

pub mod discord;

pub use discord::DiscordSink;

/// Summary of one completed batch, for periodic status notifications.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Batches completed this session
    pub checked_count: u64,
    /// Time since the session started
    pub total_time: Duration,
    /// Wall time of the last batch, including set-up
    pub check_duration: Duration,
    /// Time spent inside the dispatcher for the last batch
    pub api_duration: Duration,
    /// Whether the last batch found anything
    pub balance_found: bool,
    /// Batches with at least one find this session
    pub total_balances: u64,
}

impl BatchReport {
    pub fn status_line(&self) -> &'static str {
        if self.balance_found {
            "Balance Found!"
        } else {
            "No balance found"
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// A balance was found. `seed` is the material the address came from.
    async fn wallet_found(&self, result: &CheckResult, seed: &str) -> Result<()>;

    /// A batch of checks completed.
    async fn batch_complete(&self, report: &BatchReport) -> Result<()>;
}

/// Sink that only writes to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn wallet_found(&self, result: &CheckResult, _seed: &str) -> Result<()> {
        info!(
            network = %result.network,
            address = %result.address,
            balance = %result.balance,
            "💎 New wallet found on {}",
            registry::display_name(&result.network)
        );
        Ok(())
    }

    async fn batch_complete(&self, report: &BatchReport) -> Result<()> {
        info!(
            checked = report.checked_count,
            total_time = %format_duration(report.total_time),
            last_check = %format_duration(report.check_duration),
            api_time = %format_duration(report.api_duration),
            total_balances = report.total_balances,
            "🔍 Batch complete — {}",
            report.status_line()
        );
        Ok(())
    }
}

/// `H:MM:SS`, whole seconds only.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
