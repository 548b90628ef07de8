//! Configuration for tokenledger.
//!
//! Settings come from an optional YAML file (`~/.tokenledger/config.yaml` or
//! `--config`) and are then overridden by environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `TOKENLEDGER_STORE_URL` | `store.url` |
//! | `TOKENLEDGER_STORE_KEY` | `store.key` |
//! | `TOKENLEDGER_MACHINE_ID` | `machine_id` |
//! | `TOKENLEDGER_PROJECTS_DIR` | `projects_dir` |
//! | `TOKENLEDGER_LEDGER_PATH` | `ledger_path` |
//! | `TOKENLEDGER_PRICING_URL` | `pricing.dataset_url` |
//! | `TOKENLEDGER_DRY_RUN` | `dry_run` |
//!
//! Store URL, store key and machine id are only required when writing;
//! [`SyncConfig::validate_for_upload`] enforces that.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TokenLedgerError};
use crate::logging::default_state_dir;

/// Public LiteLLM pricing dataset used by `sync-pricing`.
pub const DEFAULT_PRICING_DATASET_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

/// Default HTTP timeout for store and dataset requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote store connection
    pub store: StoreConfig,

    /// Identifier of this machine, part of the remote uniqueness key
    pub machine_id: Option<String>,

    /// Root directory holding one subdirectory per project
    pub projects_dir: Option<PathBuf>,

    /// Location of the local sync ledger
    pub ledger_path: Option<PathBuf>,

    /// Remote pricing dataset settings
    pub pricing: PricingSourceConfig,

    /// Print per-session breakdowns instead of writing anything
    pub dry_run: bool,
}

/// Remote store connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the store's REST endpoint
    pub url: Option<String>,

    /// Write credential, sent as both `apikey` and bearer token
    pub key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Where remote pricing rows come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingSourceConfig {
    /// URL of the third-party pricing dataset
    pub dataset_url: String,
}

impl Default for PricingSourceConfig {
    fn default() -> Self {
        Self {
            dataset_url: DEFAULT_PRICING_DATASET_URL.to_string(),
        }
    }
}

/// Validated values needed to write to the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCredentials {
    pub store_url: String,
    pub store_key: String,
    pub machine_id: String,
}

/// Config file path (`~/.tokenledger/config.yaml`).
pub fn config_path() -> Result<PathBuf> {
    Ok(default_state_dir()?.join("config.yaml"))
}

impl SyncConfig {
    /// Load configuration, then apply process environment overrides.
    ///
    /// An explicit `path` must exist. Without one, the default file is read
    /// when present and defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(TokenLedgerError::ConfigNotFound {
                        path: path.to_path_buf(),
                    });
                }
                Self::from_yaml_file(path)?
            }
            None => {
                let default_path = config_path()?;
                if default_path.exists() {
                    Self::from_yaml_file(&default_path)?
                } else {
                    debug!(path = %default_path.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TokenLedgerError::io("reading config", path, e))?;
        Self::parse(&content).map_err(|message| TokenLedgerError::ConfigInvalid {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parse configuration from a YAML string.
    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup("TOKENLEDGER_STORE_URL") {
            self.store.url = Some(url);
        }
        if let Some(key) = lookup("TOKENLEDGER_STORE_KEY") {
            self.store.key = Some(key);
        }
        if let Some(machine_id) = lookup("TOKENLEDGER_MACHINE_ID") {
            self.machine_id = Some(machine_id);
        }
        if let Some(dir) = lookup("TOKENLEDGER_PROJECTS_DIR") {
            self.projects_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = lookup("TOKENLEDGER_LEDGER_PATH") {
            self.ledger_path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("TOKENLEDGER_PRICING_URL") {
            self.pricing.dataset_url = url;
        }
        if let Some(flag) = lookup("TOKENLEDGER_DRY_RUN") {
            self.dry_run = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Root directory holding project log directories (`~/.claude/projects`).
    pub fn projects_dir(&self) -> Result<PathBuf> {
        match &self.projects_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let home = dirs::home_dir().ok_or(TokenLedgerError::NoHomeDir)?;
                Ok(home.join(".claude").join("projects"))
            }
        }
    }

    /// Ledger file location (`~/.tokenledger/synced-sessions.json`).
    pub fn ledger_path(&self) -> Result<PathBuf> {
        match &self.ledger_path {
            Some(path) => Ok(path.clone()),
            None => Ok(default_state_dir()?.join("synced-sessions.json")),
        }
    }

    /// Whether the store URL and key are both present.
    pub fn has_store(&self) -> bool {
        non_empty(&self.store.url).is_some() && non_empty(&self.store.key).is_some()
    }

    /// Check that everything needed for writes is configured.
    pub fn validate_for_upload(&self) -> Result<UploadCredentials> {
        let missing = TokenLedgerError::missing_credential;
        let store_url = non_empty(&self.store.url)
            .ok_or_else(|| missing("store.url", "TOKENLEDGER_STORE_URL"))?;
        let store_key = non_empty(&self.store.key)
            .ok_or_else(|| missing("store.key", "TOKENLEDGER_STORE_KEY"))?;
        let machine_id = non_empty(&self.machine_id)
            .ok_or_else(|| missing("machine_id", "TOKENLEDGER_MACHINE_ID"))?;

        Ok(UploadCredentials {
            store_url: store_url.trim_end_matches('/').to_string(),
            store_key: store_key.to_string(),
            machine_id: machine_id.to_string(),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
