//! Discord webhook sink.
//!
//! Posts embeds to a webhook URL: a gold "new wallet" embed (plus a red
//! seed embed when seed material exists) for every find, and a blue
//! summary embed for completed batches.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{format_duration, BatchReport, NotificationSink};
use crate::dispatch::CheckResult;

const USERNAME: &str = "Chainprobe Scanner";
const COLOR_BLUE: u32 = 3_447_003;
const COLOR_GOLD: u32 = 15_844_367;
const COLOR_RED: u32 = 16_711_680;

pub struct DiscordSink {
    client: Client,
    webhook_url: String,
}

impl DiscordSink {
    pub fn new(webhook_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.to_string(),
        })
    }

    async fn post(&self, payload: &Value) -> Result<()> {
        let response = self.client.post(&self.webhook_url).json(payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Discord webhook returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        tracing::debug!("Posted Discord notification");
        Ok(())
    }
}

impl std::fmt::Debug for DiscordSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The webhook URL embeds its own secret token.
        f.debug_struct("DiscordSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn wallet_found(&self, result: &CheckResult, seed: &str) -> Result<()> {
        self.post(&wallet_found_payload(result, seed)).await
    }

    async fn batch_complete(&self, report: &BatchReport) -> Result<()> {
        self.post(&batch_complete_payload(report)).await
    }
}

// ── Payloads ────────────────────────────────────────────────────────

fn field(name: &str, value: impl Into<String>) -> Value {
    json!({ "name": name, "value": value.into(), "inline": true })
}

pub fn wallet_found_payload(result: &CheckResult, seed: &str) -> Value {
    let mut embeds = vec![json!({
        "title": "💎 New Wallet Found!",
        "color": COLOR_GOLD,
        "fields": [
            field("Network", result.network.to_uppercase()),
            field("Address", result.address.clone()),
            field("Balance", result.balance.to_string()),
        ],
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })];

    if !seed.is_empty() {
        embeds.push(json!({
            "title": "🔑 Seed Phrase",
            "description": format!("```{}```", seed),
            "color": COLOR_RED,
            "footer": { "text": "⚠️ Store this seed phrase securely!" },
        }));
    }

    json!({
        "content": "🎉 New wallet with balance found!",
        "username": USERNAME,
        "embeds": embeds,
    })
}

pub fn batch_complete_payload(report: &BatchReport) -> Value {
    let balance_status = if report.balance_found {
        "✅ Found Balance"
    } else {
        "❌ No Balance"
    };

    json!({
        "content": "",
        "username": USERNAME,
        "embeds": [{
            "title": "🔍 Batch Complete",
            "color": COLOR_BLUE,
            "fields": [
                field("Checked Count", report.checked_count.to_string()),
                field("Total Time", format_duration(report.total_time)),
                field("Last Check Duration", format_duration(report.check_duration)),
                field("API Check Time", format_duration(report.api_duration)),
                field("Balance Status", balance_status),
                field("Total Wallets", report.total_balances.to_string()),
            ],
            "footer": { "text": "Chainprobe Scanner - Batch Complete" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }],
    })
}
