//! File-backed vault: one report file per successful run.
//!
//! Reports are written to a temp file with owner-only permissions, synced,
//! then renamed into place, so a crash never leaves a half-written report.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{render_report, ResultStore};
use crate::dispatch::CheckResult;

#[derive(Debug, Clone)]
pub struct FileVault {
    dir: PathBuf,
}

impl FileVault {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// First free `balance_found_<timestamp>[_n].txt` in the vault dir.
    fn next_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = self.dir.join(format!("balance_found_{}.txt", stamp));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("balance_found_{}_{}.txt", stamp, n));
            n += 1;
        }
        path
    }
}

impl ResultStore for FileVault {
    fn persist(&self, results: &[CheckResult], seed: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create vault dir {}", self.dir.display()))?;

        let path = self.next_path();
        let tmp_path = path.with_extension("txt.tmp");
        let report = zeroize::Zeroizing::new(render_report(results, seed));

        {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .context("Failed to create temp report file")?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(fs::Permissions::from_mode(0o600))?;
            }

            file.write_all(report.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, &path).context("Atomic rename failed")?;

        tracing::info!(path = %path.display(), found = results.len(), "✅ Balance information saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn one() -> Vec<CheckResult> {
        vec![CheckResult {
            network: "ethereum".into(),
            address: "0xE".into(),
            balance: Decimal::ONE,
        }]
    }

    #[test]
    fn test_persist_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileVault::new(dir.path().join("found_wallets"));

        let path = vault.persist(&one(), "seed phrase").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Mnemonic Phrase: seed phrase\n"));
        assert!(text.contains("Network: Ethereum, Address: 0xE, Balance: 1"));
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("balance_found_"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::metadata(&path).unwrap().permissions();
            assert_eq!(perms.mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn test_same_second_reports_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileVault::new(dir.path());

        let a = vault.persist(&one(), "a").unwrap();
        let b = vault.persist(&one(), "b").unwrap();
        assert_ne!(a, b);
        assert!(fs::read_to_string(&a).unwrap().contains("Mnemonic Phrase: a"));
        assert!(fs::read_to_string(&b).unwrap().contains("Mnemonic Phrase: b"));
    }
}
