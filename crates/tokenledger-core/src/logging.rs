//! Tracing setup.
//!
//! Two sinks: a JSON line per event in `~/.tokenledger/logs/tokenledger.log`
//! (rotated daily) and compact human output on stderr. `-v` lowers the
//! default level to DEBUG; `RUST_LOG` replaces the filter entirely.
//!
//! ```no_run
//! use tokenledger_core::logging;
//!
//! # fn main() -> tokenledger_core::Result<()> {
//! let _guard = logging::init_logging(None, false)?;
//! tracing::info!("sync started");
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, TokenLedgerError};

/// Base name of the rolling log file.
pub const LOG_FILE_NAME: &str = "tokenledger.log";

/// Crates whose events pass the default filter.
const LOG_TARGETS: &[&str] = &["tokenledger", "tokenledger_cost", "tokenledger_core"];

/// Flushes the file writer when dropped; hold it until exit.
pub struct LogGuard {
    _file_guard: WorkerGuard,
}

/// Install the global subscriber. `log_dir` defaults to `~/.tokenledger/logs/`.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };
    ensure_dir(&log_dir)?;

    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .with(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_file(verbose)
                .with_line_number(verbose),
        )
        .init();

    tracing::debug!(log_dir = %log_dir.display(), verbose, "logging initialized");
    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

/// Filter directives used when `RUST_LOG` is unset.
fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|source| TokenLedgerError::StateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Console-only subscriber for tests; safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// `~/.tokenledger`
pub fn default_state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(TokenLedgerError::NoHomeDir)?;
    Ok(home.join(".tokenledger"))
}

/// `~/.tokenledger/logs`
pub fn default_log_dir() -> Result<PathBuf> {
    Ok(default_state_dir()?.join("logs"))
}

/// Log what happened to one session under the `tokenledger::sync` target.
///
/// ```ignore
/// log_sync_event!("0b7c-session", "uploaded", cost_usd = 0.42);
/// log_sync_event!("0b7c-session", "empty");
/// ```
#[macro_export]
macro_rules! log_sync_event {
    ($session_id:expr, $event:expr) => {
        tracing::info!(
            target: "tokenledger::sync",
            session_id = $session_id,
            event = $event,
            "session event"
        )
    };
    ($session_id:expr, $event:expr, $($field:tt)*) => {
        tracing::info!(
            target: "tokenledger::sync",
            session_id = $session_id,
            event = $event,
            $($field)*,
            "session event"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives(false),
            "tokenledger=info,tokenledger_cost=info,tokenledger_core=info"
        );
        assert!(default_directives(true).contains("tokenledger_cost=debug"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("logs");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_ensure_dir_fails_under_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, "x").unwrap();

        let err = ensure_dir(&file.join("logs")).unwrap_err();
        assert!(matches!(err, TokenLedgerError::StateDir { .. }));
    }

    #[test]
    fn test_macro_expands() {
        init_test_logging();
        crate::log_sync_event!("s1", "uploaded");
        crate::log_sync_event!("s1", "uploaded", cost_usd = 0.5);
    }
}
