//! File-backed persistence for the local ledger and the claim journal.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tollgate_core::claim::{ClaimJournal, PendingClaim, PendingClaims};
use tollgate_core::operation::OperationId;
use tollgate_core::{LocalClient, LocalLedger};

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("decoding {}", path.display()))
}

/// Write through a sibling temp file so a crash never leaves a torn file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let tmp = path.with_extension("tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write an empty ledger; refuses to overwrite unless `force`.
    pub fn init(&self, force: bool) -> Result<LocalLedger> {
        if self.exists() && !force {
            anyhow::bail!(
                "ledger {} already exists (pass --force to replace it)",
                self.path.display()
            );
        }
        let ledger = LocalLedger::new();
        write_json(&self.path, &ledger)?;
        Ok(ledger)
    }

    pub fn open(&self) -> Result<LocalClient> {
        if !self.exists() {
            anyhow::bail!(
                "no ledger at {} (run `tollgate init-ledger` first)",
                self.path.display()
            );
        }
        Ok(LocalClient::new(read_json(&self.path)?))
    }

    pub fn save(&self, client: &LocalClient) -> Result<()> {
        write_json(&self.path, client.ledger())?;
        tracing::debug!(
            path = %self.path.display(),
            height = client.ledger().meta.height,
            "ledger saved"
        );
        Ok(())
    }
}

/// Claim journal that hits the disk on every change.
pub struct FileJournal {
    path: PathBuf,
    claims: PendingClaims,
}

impl FileJournal {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let claims = if path.exists() {
            read_json(&path)?
        } else {
            PendingClaims::default()
        };
        Ok(Self { path, claims })
    }

    pub fn claims(&self) -> &PendingClaims {
        &self.claims
    }

    fn flush(&self) -> tollgate_core::Result<()> {
        write_json(&self.path, &self.claims)
            .map_err(|e| tollgate_core::TollError::Codec(format!("{e:#}")))
    }
}

impl ClaimJournal for FileJournal {
    fn pending(&self) -> Vec<PendingClaim> {
        self.claims.pending()
    }

    fn record(&mut self, claim: PendingClaim) -> tollgate_core::Result<()> {
        self.claims.record(claim)?;
        self.flush()
    }

    fn clear(&mut self, id: &OperationId) -> tollgate_core::Result<()> {
        self.claims.clear(id)?;
        self.flush()
    }
}
