//! Found-wallet vault — durable record of every run that found a balance.
//!
//! The dispatcher hands over the full result set of a run together with
//! the seed material it came from, and only when the set is non-empty.

pub mod store;

use std::path::PathBuf;

use anyhow::Result;

use crate::dispatch::CheckResult;
use crate::pool::registry;

pub use store::FileVault;

pub trait ResultStore: Send + Sync {
    /// Persist one run's finds. Returns where they were written.
    fn persist(&self, results: &[CheckResult], seed: &str) -> Result<PathBuf>;
}

/// Plain-text report body for one run.
pub fn render_report(results: &[CheckResult], seed: &str) -> String {
    let mut out = format!("Mnemonic Phrase: {}\n\nFound Balances:\n", seed);
    for r in results {
        out.push_str(&format!(
            "Network: {}, Address: {}, Balance: {}\n",
            registry::display_name(&r.network),
            r.address,
            r.balance
        ));
    }
    out
}
