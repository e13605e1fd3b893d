//! Progress accounting for one run.
//!
//! Each network's processing routine owns its `NetworkProgress` and is the
//! only code that increments it. After every completion it publishes a
//! copy to the shared `ProgressBoard`, which counts completions across all
//! networks and logs a snapshot of every entry at a fixed cadence.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::info;

use crate::pool::registry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkProgress {
    pub network: String,
    pub total: usize,
    pub checked: usize,
    pub with_balance: usize,
    /// Checked, but the probe never produced an answer
    pub failed: usize,
}

impl NetworkProgress {
    pub fn new(network: &str, total: usize) -> Self {
        Self {
            network: network.to_string(),
            total,
            checked: 0,
            with_balance: 0,
            failed: 0,
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.checked as f64 * 100.0 / self.total as f64
    }
}

/// Read side of the per-network counters.
#[derive(Debug)]
pub struct ProgressBoard {
    every: usize,
    completions: AtomicUsize,
    entries: Mutex<BTreeMap<String, NetworkProgress>>,
}

impl ProgressBoard {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            completions: AtomicUsize::new(0),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn register(&self, progress: NetworkProgress) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(progress.network.clone(), progress);
    }

    /// Record one completion for `progress.network`.
    /// Returns true when this completion triggered a snapshot.
    pub fn publish(&self, progress: &NetworkProgress) -> bool {
        let snapshot = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.insert(progress.network.clone(), progress.clone());
            let done = self.completions.fetch_add(1, Ordering::Relaxed) + 1;
            if done % self.every != 0 {
                return false;
            }
            entries.values().cloned().collect::<Vec<_>>()
        };

        info!("📊 Progress after {} checks", self.completions());
        for p in &snapshot {
            info!(
                network = %p.network,
                checked = p.checked,
                total = p.total,
                with_balance = p.with_balance,
                failed = p.failed,
                "{}: {}/{} ({:.1}%)",
                registry::display_name(&p.network),
                p.checked,
                p.total,
                p.percent()
            );
        }
        true
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<NetworkProgress> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
