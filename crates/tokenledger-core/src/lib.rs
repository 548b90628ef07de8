//! # tokenledger-core
//!
//! Shared building blocks for tokenledger.
//!
//! This crate provides:
//! - [`TokenLedgerError`] - Startup, configuration and filesystem errors
//! - [`logging`] - Tracing setup for console and JSON log files
//! - [`config`] - YAML + environment configuration
//!
//! ## Example
//!
//! ```no_run
//! use tokenledger_core::{SyncConfig, logging};
//!
//! fn main() -> tokenledger_core::Result<()> {
//!     let _guard = logging::init_logging(None, false)?;
//!     let config = SyncConfig::load(None)?;
//!     let creds = config.validate_for_upload()?;
//!     tracing::info!(machine_id = %creds.machine_id, "ready");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use config::{SyncConfig, UploadCredentials};
pub use error::{Result, TokenLedgerError};
pub use logging::{LogGuard, init_logging};
