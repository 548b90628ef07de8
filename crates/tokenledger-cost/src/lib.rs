//! # tokenledger-cost
//!
//! Session log parsing, cost attribution, and upload for tokenledger.
//!
//! This crate provides:
//! - [`resolve_family`] / [`PricingTable`] - Model family resolution and rates
//! - [`SessionParser`] - Deduplicating per-session aggregation of JSONL logs
//! - [`SyncLedger`] - Local record of sessions already processed
//! - [`UsageStore`] / [`RestStore`] - Remote upsert target
//! - [`IngestDriver`] - Walks the projects directory and ties it together
//!
//! ## Log Format
//!
//! Each line of a session log is a JSON object. Usage events carry a
//! `requestId` and a `usage` object either at the top level or under
//! `message`; `message.model` names the model. Lines repeating a request id
//! are streaming snapshots and the last one wins.
//!
//! ## Example
//!
//! ```no_run
//! use tokenledger_cost::{IngestDriver, PricingTable, Sink, SyncLedger};
//!
//! # async fn example() -> tokenledger_cost::Result<()> {
//! let pricing = PricingTable::builtin();
//! let mut ledger = SyncLedger::load("/tmp/synced-sessions.json");
//! let mut out = std::io::stdout();
//!
//! let projects = "/home/me/.claude/projects";
//! let mut driver = IngestDriver::new(projects, "laptop", &pricing, &mut ledger);
//! let summary = driver.run(Sink::DryRun(&mut out)).await?;
//! println!("{} sessions, ${:.4}", summary.reported, summary.total_cost_usd);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod ingest;
pub mod ledger;
pub mod models;
pub mod parser;
pub mod pricing;
pub mod pricing_sync;
pub mod store;

// Re-export main types
pub use error::{CostError, Result};
pub use ingest::{IngestDriver, IngestSummary, SessionFile, Sink, discover_sessions, project_slug};
pub use ledger::SyncLedger;
pub use models::{
    FamilyBreakdown, ParseStats, PricingRecord, SessionAggregate, TokenUsage, UsageEntry,
    UsageRecord,
};
pub use parser::SessionParser;
pub use pricing::{ModelRates, PricingTable, calculate_cost, resolve_family};
pub use pricing_sync::{load_pricing_table, sync_remote_pricing};
pub use store::{RestStore, UsageStore};
