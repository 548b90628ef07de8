//! Startup errors.
//!
//! [`TokenLedgerError`] covers everything that can go wrong before the
//! ingestion pipeline runs: reading configuration, locating the state
//! directory, and setting up logging.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`TokenLedgerError`].
pub type Result<T> = std::result::Result<T, TokenLedgerError>;

#[derive(Debug, Error)]
pub enum TokenLedgerError {
    /// `--config` named a file that does not exist
    #[error("config file {path} does not exist")]
    ConfigNotFound { path: PathBuf },

    /// Config file is not valid YAML for [`crate::SyncConfig`]
    #[error("config file {path} is invalid: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    /// A value required for uploads is unset
    #[error("{field} is not configured (set {env_var})")]
    MissingCredential {
        field: &'static str,
        env_var: &'static str,
    },

    #[error("failed {operation} {path}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// State or log directory could not be created
    #[error("cannot create state directory {path}")]
    StateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("home directory could not be determined")]
    NoHomeDir,
}

impl TokenLedgerError {
    pub fn missing_credential(field: &'static str, env_var: &'static str) -> Self {
        Self::MissingCredential { field, env_var }
    }

    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether fixing the config file or environment resolves the error.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::ConfigInvalid { .. }
                | Self::MissingCredential { .. }
        )
    }

    /// One-line hint printed under the error.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::MissingCredential { .. } => Some(
                "Set TOKENLEDGER_STORE_URL, TOKENLEDGER_STORE_KEY and TOKENLEDGER_MACHINE_ID, \
                 or run with --dry-run",
            ),
            Self::ConfigInvalid { .. } => Some("Check the YAML syntax of the config file"),
            Self::ConfigNotFound { .. } => Some("Pass an existing file to --config"),
            Self::StateDir { .. } => Some("Check permissions on ~/.tokenledger"),
            Self::NoHomeDir => Some("Set HOME, or pass --projects-dir and TOKENLEDGER_LEDGER_PATH"),
            Self::Io { .. } => None,
        }
    }
}
