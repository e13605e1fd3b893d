//! Address source — batches of already-derived addresses to check.
//!
//! Derivation happens elsewhere. A batch is the seed material plus the
//! addresses derived from it, grouped first by scheme tag (`Bip44`) and
//! then by network:
//!
//! ```yaml
//! batches:
//!   - seed: "abandon abandon ... about"
//!     Bip44:
//!       ethereum: ["0x9858EfFD232B4033E47d90003D41EC34EcaEda94"]
//!       tron: ["TUEZSdKsoDHQMeZwihtdoBiN46zxhGWYdH"]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use zeroize::Zeroizing;

/// scheme tag → network → ordered addresses
pub type DerivedAddresses = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// One unit of work for the dispatcher.
pub struct AddressBatch {
    pub seed: Zeroizing<String>,
    pub addresses: DerivedAddresses,
}

impl AddressBatch {
    /// Drop every network `keep` rejects, in every scheme.
    pub fn retain_networks(&mut self, mut keep: impl FnMut(&str) -> bool) {
        for networks in self.addresses.values_mut() {
            networks.retain(|network, _| keep(network));
        }
    }

    pub fn address_count(&self) -> usize {
        self.addresses
            .values()
            .flat_map(|networks| networks.values())
            .map(Vec::len)
            .sum()
    }
}

impl std::fmt::Debug for AddressBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressBatch")
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}

pub trait AddressSource {
    /// Next batch to check, or `None` when the source is exhausted.
    fn next_batch(&mut self) -> Option<AddressBatch>;
}

#[derive(Deserialize)]
struct SourceDoc {
    #[serde(default)]
    batches: Vec<BatchDoc>,
}

#[derive(Deserialize)]
struct BatchDoc {
    #[serde(default)]
    seed: String,
    #[serde(flatten)]
    schemes: DerivedAddresses,
}

/// Batches read up front from a YAML (or JSON) document.
pub struct FileSource {
    batches: VecDeque<AddressBatch>,
}

impl FileSource {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read address file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid address file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let doc: SourceDoc = serde_yaml::from_str(content)?;
        let batches = doc
            .batches
            .into_iter()
            .map(|b| AddressBatch {
                seed: Zeroizing::new(b.seed),
                addresses: b.schemes,
            })
            .collect();
        Ok(Self { batches })
    }

    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

impl AddressSource for FileSource {
    fn next_batch(&mut self) -> Option<AddressBatch> {
        self.batches.pop_front()
    }
}
