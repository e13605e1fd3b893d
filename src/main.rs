//! Chainprobe — rate-limited balance checker for derived wallet addresses.
//!
//! Reads batches of already-derived addresses, checks every address
//! against the public block explorers of its network, and reports any
//! address holding a balance.
//!
//! - Several API keys per network, each kept under its own per-key limit
//! - All networks checked concurrently, one pooled HTTP client per process
//! - Finds go to Discord (or the log) and to a report file on disk
//! - Keys and seed material never appear in logs

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

mod adapters;
mod config;
mod dispatch;
mod notify;
mod pool;
mod source;
mod vault;

use adapters::ExplorerClient;
use config::{Config, CredentialProvider, Paths};
use dispatch::{DispatchSettings, Dispatcher, RunOutcome};
use notify::{format_duration, BatchReport, DiscordSink, LogSink, NotificationSink};
use pool::registry;
use source::{AddressSource, FileSource};
use vault::FileVault;

/// Running totals for one process lifetime.
#[derive(Debug, Default)]
struct Session {
    batches: u64,
    batches_with_balance: u64,
    addresses: usize,
    finds: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("🔎 Chainprobe v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let paths = Paths::from_env()?;
    std::fs::create_dir_all(&paths.data_dir)
        .with_context(|| format!("Failed to create {}", paths.data_dir.display()))?;

    let config = Arc::new(Config::from_file(&paths.config_path)?);
    info!(config = %paths.config_path.display(), "⚙️  Configuration loaded");

    for network in &config.networks {
        let keys = config.credentials_for(network).len();
        if keys == 0 {
            warn!(network = %network, "No usable API keys — network will be skipped");
        } else {
            info!(network = %network, keys, "{} ready", registry::display_name(network));
        }
    }

    // ── Collaborators ───────────────────────────────────────────────
    let prober = Arc::new(
        ExplorerClient::new(config.http_settings()).context("Failed to build HTTP client")?,
    );

    let sink: Arc<dyn NotificationSink> = match &config.discord {
        Some(discord) => {
            info!("🔔 Discord notifications enabled");
            Arc::new(DiscordSink::new(&discord.webhook_url)?)
        }
        None => {
            info!("🔔 No Discord webhook configured — notifications go to the log");
            Arc::new(LogSink)
        }
    };
    let notification_interval = config
        .discord
        .as_ref()
        .map_or(1, |discord| discord.notification_interval);

    let output_dir = config.output_dir_in(&paths.data_dir);
    let store = Arc::new(FileVault::new(output_dir));
    info!(dir = %store.dir().display(), "💾 Finds will be saved here");

    let credentials: Arc<dyn CredentialProvider> = config.clone();
    let dispatcher = Dispatcher::new(
        prober,
        credentials,
        Arc::clone(&sink),
        store,
        DispatchSettings::from_config(&config),
    );

    // ── Address Source ──────────────────────────────────────────────
    let source_path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("CHAINPROBE_ADDRESSES"))
        .map(PathBuf::from)
        .context("usage: chainprobe <addresses.yaml> (or set CHAINPROBE_ADDRESSES)")?;
    let mut source = FileSource::from_file(&source_path)?;
    info!(
        file = %source_path.display(),
        batches = source.remaining(),
        "📥 Address batches loaded"
    );

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // ── Batch Loop ──────────────────────────────────────────────────
    let session_start = Instant::now();
    let mut session = Session::default();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let Some(mut batch) = source.next_batch() else {
            info!("Address source exhausted");
            break;
        };
        batch.retain_networks(|network| config.should_dispatch(network));
        info!(addresses = batch.address_count(), "📦 Checking next batch");

        let check_start = Instant::now();
        let outcome = tokio::select! {
            outcome = dispatcher.run(&batch.addresses, &batch.seed) => outcome,
            _ = &mut shutdown => {
                info!("🛑 Interrupted — abandoning the current batch");
                break;
            }
        };
        let check_duration = check_start.elapsed();

        let summary = match outcome {
            RunOutcome::NothingToDo => continue,
            RunOutcome::Completed(summary) => summary,
        };

        session.batches += 1;
        session.addresses += summary.checked();
        session.finds += summary.results.len();
        if summary.found() {
            session.batches_with_balance += 1;
        }

        let report = BatchReport {
            checked_count: session.batches,
            total_time: session_start.elapsed(),
            check_duration,
            api_duration: summary.elapsed,
            balance_found: summary.found(),
            total_balances: session.batches_with_balance,
        };
        info!(run_id = %summary.run_id, skipped = summary.skipped.len(), "Batch done");
        print_status(&report, &session);

        if session.batches % notification_interval == 0 {
            if let Err(e) = sink.batch_complete(&report).await {
                error!("Batch notification failed: {:#}", e);
            }
        }
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        batches = session.batches,
        addresses = session.addresses,
        finds = session.finds,
        "Session finished after {}",
        format_duration(session_start.elapsed())
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    Ok(())
}

/// Structured logs; JSON lines when `CHAINPROBE_LOG_JSON=1`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chainprobe=info".into());

    let json = std::env::var("CHAINPROBE_LOG_JSON").is_ok_and(|v| v == "1");
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn print_status(report: &BatchReport, session: &Session) {
    info!("── Status ──────────────────────────────────────");
    info!("Runtime:            {}", format_duration(report.total_time));
    info!("Batches checked:    {}", report.checked_count);
    info!("Addresses checked:  {}", session.addresses);
    info!("Last check:         {}", format_duration(report.check_duration));
    info!("Last API time:      {}", format_duration(report.api_duration));
    info!("Result:             {}", report.status_line());
    info!("Batches with finds: {}", report.total_balances);
}
