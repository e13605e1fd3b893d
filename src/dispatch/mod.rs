//! Dispatch — turns one batch of derived addresses into a checked result set.
//!
//! A run partitions the addresses by network, builds a fresh key selector
//! for every network that has usable credentials, and then drives all
//! networks concurrently. Within a network, addresses go out in chunks of
//! `2 × key_count`; every probe of a chunk waits on the selector before
//! its request, and the next chunk starts only after the whole chunk has
//! finished.
//!
//! Nothing that goes wrong with a single probe escapes a run. Probe
//! errors become "checked, no result", sink and store failures are
//! logged, and networks that cannot run are reported as skipped.

pub mod progress;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::adapters::{ProbeError, ProbeOutcome, Prober};
use crate::config::{Config, CredentialProvider};
use crate::notify::NotificationSink;
use crate::pool::rate_tracker::RateLimit;
use crate::pool::registry::{self, BIP44_SCHEME};
use crate::pool::{KeySelector, KeyStatus, LimiterRegistry};
use crate::source::DerivedAddresses;
use crate::vault::ResultStore;

pub use progress::{NetworkProgress, ProgressBoard};

// ── Core Types ──────────────────────────────────────────────────────

/// One address to check on one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressTask {
    pub network: String,
    pub address: String,
}

/// An address that holds a positive balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub network: String,
    pub address: String,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    #[error("network is not supported")]
    UnsupportedNetwork,
    #[error("no usable API keys configured")]
    NoCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedNetwork {
    pub network: String,
    pub reason: SkipReason,
}

/// Everything a completed run reports back.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Final counters, one entry per dispatched network
    pub progress: Vec<NetworkProgress>,
    pub skipped: Vec<SkippedNetwork>,
    /// Finds, ordered by network then address
    pub results: Vec<CheckResult>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn found(&self) -> bool {
        !self.results.is_empty()
    }

    pub fn checked(&self) -> usize {
        self.progress.iter().map(|p| p.checked).sum()
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The batch held no addresses at all.
    NothingToDo,
    Completed(RunSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Dispatching,
    Aggregating,
    Completed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Dispatching => "dispatching",
            RunState::Aggregating => "aggregating",
            RunState::Completed => "completed",
        };
        f.write_str(name)
    }
}

fn advance(state: &mut RunState, next: RunState) {
    debug!(from = %state, to = %next, "Run state change");
    *state = next;
}

// ── Settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Pause before the single retry after a 429
    pub retry_backoff: Duration,
    /// Log a progress snapshot every N completions
    pub progress_every: usize,
    /// Longest wait for the sink to accept one "wallet found" event
    pub notify_timeout: Duration,
    pub default_limit: RateLimit,
    /// Per-network overrides of `default_limit`
    pub limits: BTreeMap<String, RateLimit>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(500),
            progress_every: 10,
            notify_timeout: Duration::from_secs(10),
            default_limit: RateLimit::default(),
            limits: BTreeMap::new(),
        }
    }
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry_backoff: config.retry_backoff(),
            progress_every: config.progress_every,
            notify_timeout: config.notify_timeout(),
            default_limit: config.rate_limit.to_limit(),
            limits: registry::supported_ids()
                .into_iter()
                .map(|id| (id.to_string(), config.rate_limit_for(id)))
                .collect(),
        }
    }

    pub fn limit_for(&self, network: &str) -> RateLimit {
        self.limits
            .get(network)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// The engine plus its collaborators. Reusable across runs; limiter state
/// is rebuilt for every run.
pub struct Dispatcher {
    prober: Arc<dyn Prober>,
    credentials: Arc<dyn CredentialProvider>,
    sink: Arc<dyn NotificationSink>,
    store: Arc<dyn ResultStore>,
    settings: DispatchSettings,
}

struct NetworkPlan {
    selector: Arc<KeySelector>,
    tasks: Vec<AddressTask>,
}

impl Dispatcher {
    pub fn new(
        prober: Arc<dyn Prober>,
        credentials: Arc<dyn CredentialProvider>,
        sink: Arc<dyn NotificationSink>,
        store: Arc<dyn ResultStore>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            prober,
            credentials,
            sink,
            store,
            settings,
        }
    }

    /// Check every address of `addresses` once.
    ///
    /// `seed` is the material the addresses were derived from; it goes to
    /// the sink with every find and to the store with the final result set.
    pub async fn run(&self, addresses: &DerivedAddresses, seed: &str) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.run_inner(run_id, addresses, seed).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, addresses: &DerivedAddresses, seed: &str) -> RunOutcome {
        let started = Instant::now();
        let mut state = RunState::Idle;

        let networks = match addresses.get(BIP44_SCHEME) {
            Some(networks) if networks.values().any(|a| !a.is_empty()) => networks,
            _ => {
                info!("No addresses in batch — nothing to do");
                return RunOutcome::NothingToDo;
            }
        };

        // Idle → Dispatching: one selector per network with usable keys
        let mut limiters = LimiterRegistry::new();
        let mut skipped = Vec::new();
        let mut pending: BTreeMap<&str, Vec<AddressTask>> = BTreeMap::new();

        for (network, list) in networks {
            if list.is_empty() {
                continue;
            }
            if let Err(reason) = self.prepare(network, &mut limiters) {
                warn!(network = %network, addresses = list.len(), "Skipping network: {}", reason);
                skipped.push(SkippedNetwork {
                    network: network.clone(),
                    reason,
                });
                continue;
            }
            let tasks = list
                .iter()
                .map(|address| AddressTask {
                    network: network.clone(),
                    address: address.clone(),
                })
                .collect();
            pending.insert(network.as_str(), tasks);
        }

        let plans: Vec<NetworkPlan> = limiters
            .networks()
            .filter_map(|network| {
                Some(NetworkPlan {
                    selector: limiters.get(network)?,
                    tasks: pending.remove(network)?,
                })
            })
            .collect();

        let board = ProgressBoard::new(self.settings.progress_every);
        for plan in &plans {
            board.register(NetworkProgress::new(plan.selector.network(), plan.tasks.len()));
        }

        advance(&mut state, RunState::Dispatching);
        if limiters.is_empty() {
            warn!("No network in this batch can be checked");
        } else {
            info!(
                "🚀 Checking {} addresses on {} networks",
                plans.iter().map(|p| p.tasks.len()).sum::<usize>(),
                limiters.len()
            );
        }

        let reports = join_all(
            plans
                .iter()
                .map(|plan| self.process_network(&plan.selector, &plan.tasks, &board, seed)),
        )
        .await;

        // Dispatching → Aggregating
        advance(&mut state, RunState::Aggregating);
        let progress = board.snapshot();
        let mut results: Vec<CheckResult> = reports.into_iter().flatten().collect();
        results.sort_by(|a, b| (&a.network, &a.address).cmp(&(&b.network, &b.address)));

        if !results.is_empty() {
            self.persist(&results, seed).await;
        }

        advance(&mut state, RunState::Completed);
        let summary = RunSummary {
            run_id,
            progress,
            skipped,
            results,
            elapsed: started.elapsed(),
        };
        info!(
            checked = summary.checked(),
            found = summary.results.len(),
            skipped = summary.skipped.len(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "✅ Run complete"
        );
        RunOutcome::Completed(summary)
    }

    /// Register a selector for `network`, or say why it cannot run.
    fn prepare(&self, network: &str, limiters: &mut LimiterRegistry) -> Result<(), SkipReason> {
        if registry::get_network(network).is_none() {
            return Err(SkipReason::UnsupportedNetwork);
        }
        let credentials = self.credentials.credentials_for(network);
        let key_count = credentials.len();
        let selector = KeySelector::new(network, credentials, self.settings.limit_for(network))
            .ok_or(SkipReason::NoCredentials)?;
        debug!(network = %network, keys = key_count, "Key selector ready");
        limiters.insert(selector);
        Ok(())
    }

    /// Hand the run's finds to the store on the blocking pool.
    async fn persist(&self, results: &[CheckResult], seed: &str) {
        let store = Arc::clone(&self.store);
        let owned = results.to_vec();
        let seed = Zeroizing::new(seed.to_string());
        let saved = tokio::task::spawn_blocking(move || store.persist(&owned, &seed)).await;

        match saved {
            Ok(Ok(path)) => info!(finds = results.len(), "💾 Saved finds to {}", path.display()),
            Ok(Err(e)) => error!(finds = results.len(), "Failed to persist finds: {:#}", e),
            Err(e) => error!(finds = results.len(), "Persist task failed: {}", e),
        }
    }

    /// Notify the sink of one find. A slow sink only holds up its own
    /// network, and for at most `notify_timeout`.
    async fn notify_found(&self, result: &CheckResult, seed: &str) {
        let sent = tokio::time::timeout(
            self.settings.notify_timeout,
            self.sink.wallet_found(result, seed),
        )
        .await;

        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(network = %result.network, "Wallet notification failed: {:#}", e),
            Err(_) => error!(
                network = %result.network,
                timeout_ms = self.settings.notify_timeout.as_millis() as u64,
                "Wallet notification timed out"
            ),
        }
    }

    /// Process one network's addresses chunk by chunk. Its counters are
    /// only ever written here and published to `board`.
    async fn process_network(
        &self,
        selector: &KeySelector,
        tasks: &[AddressTask],
        board: &ProgressBoard,
        seed: &str,
    ) -> Vec<CheckResult> {
        let network = selector.network();
        let chunk_size = 2 * selector.key_count();
        let mut progress = NetworkProgress::new(network, tasks.len());
        let mut results = Vec::new();

        for chunk in tasks.chunks(chunk_size) {
            let mut in_flight: FuturesUnordered<_> =
                chunk.iter().map(|task| self.check(selector, task)).collect();

            while let Some((task, outcome)) = in_flight.next().await {
                progress.checked += 1;
                match outcome {
                    Ok(ProbeOutcome::Balance(balance)) if balance > Decimal::ZERO => {
                        let result = CheckResult {
                            network: task.network.clone(),
                            address: task.address.clone(),
                            balance,
                        };
                        progress.with_balance += 1;
                        info!(
                            network = %network,
                            address = %task.address,
                            balance = %balance,
                            "💰 Balance found"
                        );
                        self.notify_found(&result, seed).await;
                        results.push(result);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        progress.failed += 1;
                        debug!(network = %network, address = %task.address, "Probe failed: {}", e);
                    }
                }
                board.publish(&progress);
            }
        }

        let rate_limited = selector
            .statuses()
            .await
            .into_iter()
            .filter(|(_, status)| *status == KeyStatus::RateLimited)
            .count();
        info!(
            network = %network,
            checked = progress.checked,
            with_balance = progress.with_balance,
            failed = progress.failed,
            rate_limited_keys = rate_limited,
            "Finished {}",
            registry::display_name(network)
        );
        results
    }

    /// One probe, retried once after a 429.
    async fn check<'a>(
        &self,
        selector: &KeySelector,
        task: &'a AddressTask,
    ) -> (&'a AddressTask, Result<ProbeOutcome, ProbeError>) {
        let credential = selector.next_available_key().await;
        let first = self
            .prober
            .probe(&task.network, &task.address, &credential)
            .await;
        if first != Err(ProbeError::RateLimited) {
            return (task, first);
        }

        selector.mark_rate_limited(&credential).await;
        tokio::time::sleep(self.settings.retry_backoff).await;

        let credential = selector.next_available_key().await;
        let second = self
            .prober
            .probe(&task.network, &task.address, &credential)
            .await;
        if second == Err(ProbeError::RateLimited) {
            selector.mark_rate_limited(&credential).await;
        }
        (task, second)
    }
}
