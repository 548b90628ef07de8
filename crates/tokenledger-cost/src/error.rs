//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Ingestion, pricing, and store errors.
#[derive(Error, Debug)]
pub enum CostError {
    /// IO error (log files, ledger file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level HTTP failure (connect, timeout, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote store answered with a non-success status
    #[error("store rejected request ({status}): {message}")]
    Store {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Ledger persistence error
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Pricing dataset could not be used
    #[error("pricing error: {0}")]
    Pricing(String),
}

impl CostError {
    /// Check if a later run could plausibly succeed without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            CostError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            CostError::Store { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Message shown to the user in place of the raw error.
    pub fn friendly_message(&self) -> String {
        match self {
            CostError::Store { status: 401 | 403, .. } => {
                "Store rejected the credentials. Check TOKENLEDGER_STORE_KEY.".to_string()
            }
            CostError::Store { status: 409, message } => {
                format!("Store reported a conflict: {}", message)
            }
            CostError::Http(e) if e.is_timeout() => {
                "Request to the store timed out. The session will be retried next run.".to_string()
            }
            CostError::Http(e) if e.is_connect() => {
                "Could not connect to the store. Check TOKENLEDGER_STORE_URL.".to_string()
            }
            CostError::Io(e) => match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    format!("Permission denied reading session logs: {}", e)
                }
                std::io::ErrorKind::NotFound => concat!(
                    "Projects directory not found. ",
                    "Pass --projects-dir or set TOKENLEDGER_PROJECTS_DIR."
                )
                .to_string(),
                _ => format!("File system error: {}", e),
            },
            _ => self.to_string(),
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, CostError>;
