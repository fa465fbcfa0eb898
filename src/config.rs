//! Operator configuration, read from `~/.tollgate/config.toml` or `--config`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tollgate_core::collect::{CollectOptions, DEFAULT_BATCH_SIZE};
use tollgate_core::{Address, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    /// JSON file holding the local ledger
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Hex secret of the default signing identity
    #[serde(default = "default_keypair_path")]
    pub keypair_path: PathBuf,

    /// Claims submitted but not yet confirmed
    #[serde(default = "default_journal_path")]
    pub claim_journal_path: PathBuf,

    /// Extra accounts or owners left out of holder payouts (base58)
    #[serde(default)]
    pub holder_exceptions: Vec<String>,

    /// Source accounts per sweep operation
    #[serde(default = "default_batch_size")]
    pub collect_batch_size: usize,

    /// Attempts per operation on transient submission failures
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tollgate")
}

pub fn default_config_path() -> PathBuf {
    base_dir().join("config.toml")
}

fn default_ledger_path() -> PathBuf {
    base_dir().join("ledger.json")
}

fn default_keypair_path() -> PathBuf {
    base_dir().join("id.key")
}

fn default_journal_path() -> PathBuf {
    base_dir().join("pending-claims.json")
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_retry_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            keypair_path: default_keypair_path(),
            claim_journal_path: default_journal_path(),
            holder_exceptions: Vec::new(),
            collect_batch_size: default_batch_size(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl CliConfig {
    /// Load `path`, or the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.collect_batch_size == 0 {
            bail!("collect_batch_size must be at least 1");
        }
        if self.retry_attempts == 0 {
            bail!("retry_attempts must be at least 1");
        }
        self.exceptions()?;
        Ok(())
    }

    pub fn exceptions(&self) -> Result<BTreeSet<Address>> {
        self.holder_exceptions
            .iter()
            .map(|s| {
                s.parse::<Address>()
                    .with_context(|| format!("holder_exceptions entry {s:?}"))
            })
            .collect()
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
        }
    }

    pub fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            batch_size: self.collect_batch_size,
            retry: self.retry(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.collect_batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let exception = Address::from_label("treasury").to_string();
        writeln!(
            file,
            "ledger_path = \"/tmp/l.json\"\nretry_attempts = 5\nholder_exceptions = [\"{exception}\"]"
        )
        .unwrap();
        let config = CliConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.ledger_path, PathBuf::from("/tmp/l.json"));
        assert_eq!(config.retry().max_attempts, 5);
        assert_eq!(config.collect_batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.exceptions().unwrap().contains(&Address::from_label("treasury")));
    }

    #[test]
    fn malformed_exception_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "holder_exceptions = [\"not-an-address!\"]").unwrap();
        assert!(CliConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = CliConfig {
            collect_batch_size: 0,
            ..CliConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
