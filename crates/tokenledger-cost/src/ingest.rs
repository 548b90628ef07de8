//! Ingestion driver: walk session logs, price them, upload each session once.
//!
//! Layout under the projects root:
//!
//! ```text
//! <root>/<encoded-project-dir>/<session-id>.jsonl
//! ```
//!
//! Sessions are processed one at a time in sorted order. A session is marked
//! in the ledger only after its upload succeeded (or it turned out to be
//! empty); a failed upload is left for the next run.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokenledger_core::log_sync_event;
use tracing::{debug, error, info, warn};

use crate::error::{CostError, Result};
use crate::ledger::SyncLedger;
use crate::models::{SessionAggregate, UsageRecord};
use crate::parser::SessionParser;
use crate::pricing::{DEFAULT_FAMILY, PricingTable};
use crate::store::UsageStore;

/// Extension of session log files.
pub const SESSION_EXTENSION: &str = "jsonl";

/// Where processed sessions go.
pub enum Sink<'a> {
    /// Print per-session breakdowns; never write the ledger or the store
    DryRun(&'a mut dyn Write),
    /// Upsert into the remote store and record successes in the ledger
    Remote(&'a dyn UsageStore),
}

/// Counters for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    /// Session files found
    pub scanned: usize,
    /// Skipped because the ledger already has them
    pub skipped_synced: usize,
    /// Sessions without input or output tokens
    pub empty: usize,
    /// Sessions upserted into the store
    pub uploaded: usize,
    /// Sessions that failed to parse, upload, or be recorded
    pub failed: usize,
    /// Sessions printed in dry-run mode
    pub reported: usize,
    /// Cost of uploaded (or reported) sessions in USD
    pub total_cost_usd: f64,
}

/// One session log found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFile {
    pub session_id: String,
    pub project_slug: String,
    pub path: PathBuf,
}

/// Derive the project name from an encoded directory name.
///
/// Directory names encode the project path with dashes
/// (`-Users-me-code-api` → `api`); the last segment is the project.
pub fn project_slug(dir_name: &str) -> String {
    dir_name
        .rsplit('-')
        .find(|segment| !segment.is_empty())
        .unwrap_or(dir_name)
        .to_string()
}

/// List every session file under `root`, projects and files in name order.
pub fn discover_sessions(root: &Path) -> Result<Vec<SessionFile>> {
    if !root.is_dir() {
        return Err(CostError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("projects directory not found: {}", root.display()),
        )));
    }

    let mut project_dirs: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    project_dirs.sort();

    let mut sessions = Vec::new();
    for dir in project_dirs {
        let Some(dir_name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let slug = project_slug(dir_name);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read project directory");
                continue;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file() && path.extension().is_some_and(|e| e == SESSION_EXTENSION)
            })
            .collect();
        files.sort();

        for path in files {
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            sessions.push(SessionFile {
                session_id: session_id.to_string(),
                project_slug: slug.clone(),
                path,
            });
        }
    }

    Ok(sessions)
}

enum SessionOutcome {
    AlreadySynced,
    Empty,
    Uploaded(f64),
    Reported(f64),
    Failed,
}

/// Sequential ingestion over a projects directory.
pub struct IngestDriver<'a> {
    projects_dir: PathBuf,
    machine_id: String,
    pricing: &'a PricingTable,
    ledger: &'a mut SyncLedger,
}

impl<'a> IngestDriver<'a> {
    pub fn new(
        projects_dir: impl Into<PathBuf>,
        machine_id: impl Into<String>,
        pricing: &'a PricingTable,
        ledger: &'a mut SyncLedger,
    ) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            machine_id: machine_id.into(),
            pricing,
            ledger,
        }
    }

    /// Process every session not yet in the ledger.
    pub async fn run(&mut self, mut sink: Sink<'_>) -> Result<IngestSummary> {
        let sessions = discover_sessions(&self.projects_dir)?;
        let mut summary = IngestSummary {
            scanned: sessions.len(),
            ..Default::default()
        };
        info!(
            root = %self.projects_dir.display(),
            sessions = sessions.len(),
            already_synced = self.ledger.len(),
            "starting ingestion"
        );

        for file in &sessions {
            match self.process_session(file, &mut sink).await {
                SessionOutcome::AlreadySynced => summary.skipped_synced += 1,
                SessionOutcome::Empty => summary.empty += 1,
                SessionOutcome::Uploaded(cost) => {
                    summary.uploaded += 1;
                    summary.total_cost_usd += cost;
                }
                SessionOutcome::Reported(cost) => {
                    summary.reported += 1;
                    summary.total_cost_usd += cost;
                }
                SessionOutcome::Failed => summary.failed += 1,
            }
        }

        summary.total_cost_usd = crate::pricing::round_cost(summary.total_cost_usd);
        info!(
            scanned = summary.scanned,
            skipped = summary.skipped_synced,
            empty = summary.empty,
            uploaded = summary.uploaded,
            reported = summary.reported,
            failed = summary.failed,
            total_cost_usd = summary.total_cost_usd,
            "ingestion finished"
        );
        Ok(summary)
    }

    async fn process_session(
        &mut self,
        file: &SessionFile,
        sink: &mut Sink<'_>,
    ) -> SessionOutcome {
        if self.ledger.is_synced(&file.session_id) {
            debug!(session_id = %file.session_id, "already synced");
            return SessionOutcome::AlreadySynced;
        }

        let aggregate = match SessionParser::new(self.pricing).parse_file(&file.path) {
            Ok(aggregate) => aggregate,
            Err(e) => {
                error!(
                    session_id = %file.session_id,
                    file = %file.path.display(),
                    error = %e,
                    "failed to read session log"
                );
                return SessionOutcome::Failed;
            }
        };

        if aggregate.is_empty() {
            return match sink {
                Sink::DryRun(out) => {
                    if let Err(e) = writeln!(
                        out,
                        "Session {} ({}): no token usage, skipped",
                        file.session_id, file.project_slug
                    ) {
                        warn!(error = %e, "failed to write dry-run output");
                    }
                    SessionOutcome::Empty
                }
                Sink::Remote(_) => self.mark(file, "empty", SessionOutcome::Empty),
            };
        }

        let record = build_record(&self.machine_id, file, &aggregate, file_times(&file.path));

        match sink {
            Sink::DryRun(out) => {
                if let Err(e) = render_session_report(&mut **out, file, &aggregate) {
                    warn!(error = %e, "failed to write dry-run output");
                }
                SessionOutcome::Reported(record.cost_usd)
            }
            Sink::Remote(store) => match store.upsert_usage(&record).await {
                Ok(()) => {
                    let cost = record.cost_usd;
                    self.mark(file, "uploaded", SessionOutcome::Uploaded(cost))
                }
                Err(e) => {
                    error!(
                        session_id = %file.session_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "upload failed; session stays pending"
                    );
                    SessionOutcome::Failed
                }
            },
        }
    }

    fn mark(
        &mut self,
        file: &SessionFile,
        event: &str,
        outcome: SessionOutcome,
    ) -> SessionOutcome {
        match self.ledger.mark_synced(&file.session_id) {
            Ok(_) => {
                log_sync_event!(
                    file.session_id.as_str(),
                    event,
                    project = file.project_slug.as_str()
                );
                outcome
            }
            Err(e) => {
                error!(
                    session_id = %file.session_id,
                    error = %e,
                    "failed to record session in ledger"
                );
                SessionOutcome::Failed
            }
        }
    }
}

/// Filesystem (created, modified) times, used when a log has no timestamps.
fn file_times(path: &Path) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let Ok(meta) = fs::metadata(path) else {
        return (None, None);
    };
    let to_utc = |t: io::Result<SystemTime>| t.ok().map(DateTime::<Utc>::from);
    (to_utc(meta.created()), to_utc(meta.modified()))
}

/// Assemble the complete upload row for a non-empty session.
pub fn build_record(
    machine_id: &str,
    file: &SessionFile,
    aggregate: &SessionAggregate,
    (created, modified): (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
) -> UsageRecord {
    let now = Utc::now();
    let session_start = aggregate
        .started_at
        .or(created)
        .or(modified)
        .unwrap_or(now);
    let session_end = aggregate
        .ended_at
        .or(modified)
        .or(created)
        .unwrap_or(now);

    UsageRecord {
        machine_id: machine_id.to_string(),
        session_id: file.session_id.clone(),
        model: aggregate
            .primary_family
            .clone()
            .unwrap_or_else(|| DEFAULT_FAMILY.to_string()),
        project_slug: file.project_slug.clone(),
        input_tokens: aggregate.usage.input_tokens,
        output_tokens: aggregate.usage.output_tokens,
        cache_write_tokens: aggregate.usage.cache_write_tokens,
        cache_read_tokens: aggregate.usage.cache_read_tokens,
        cost_usd: aggregate.cost_usd,
        session_start,
        session_end,
    }
}

/// Write the dry-run breakdown for one session.
pub fn render_session_report(
    out: &mut dyn Write,
    file: &SessionFile,
    aggregate: &SessionAggregate,
) -> io::Result<()> {
    let usage = &aggregate.usage;
    writeln!(out, "Session {} ({})", file.session_id, file.project_slug)?;
    writeln!(
        out,
        "  model: {}  requests: {}  skipped lines: {}",
        aggregate.primary_family.as_deref().unwrap_or(DEFAULT_FAMILY),
        aggregate.stats.unique_requests,
        aggregate.stats.skipped_lines
    )?;
    if let (Some(start), Some(end)) = (aggregate.started_at, aggregate.ended_at) {
        writeln!(out, "  span: {} .. {}", start.to_rfc3339(), end.to_rfc3339())?;
    }
    writeln!(
        out,
        "  tokens: input {} | output {} | cache write {} | cache read {} | total {}",
        usage.input_tokens,
        usage.output_tokens,
        usage.cache_write_tokens,
        usage.cache_read_tokens,
        usage.total_tokens()
    )?;
    for family in &aggregate.families {
        writeln!(
            out,
            "    {:<20} {:>5} req  ${:.6}",
            family.family, family.request_count, family.cost_usd
        )?;
    }
    writeln!(out, "  total: ${:.6}", aggregate.cost_usd)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FamilyBreakdown, TokenUsage};
    use chrono::TimeZone;

    fn session_file() -> SessionFile {
        SessionFile {
            session_id: "0b7c".into(),
            project_slug: "api".into(),
            path: PathBuf::from("/tmp/0b7c.jsonl"),
        }
    }

    #[test]
    fn test_project_slug_takes_last_segment() {
        assert_eq!(project_slug("-Users-me-code-api"), "api");
        assert_eq!(project_slug("plain"), "plain");
        assert_eq!(project_slug("-home-dev-tool-"), "tool");
    }

    #[test]
    fn test_discover_sessions_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("-home-b-beta");
        let a = dir.path().join("-home-a-alpha");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join("s2.jsonl"), "").unwrap();
        fs::write(a.join("s1.jsonl"), "").unwrap();
        fs::write(a.join("notes.txt"), "").unwrap();
        fs::write(b.join("s3.jsonl"), "").unwrap();
        fs::write(dir.path().join("stray.jsonl"), "").unwrap();

        let sessions = discover_sessions(dir.path()).unwrap();
        let ids: Vec<_> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
        assert_eq!(sessions[0].project_slug, "alpha");
        assert_eq!(sessions[2].project_slug, "beta");
    }

    #[test]
    fn test_discover_missing_root_is_error() {
        assert!(discover_sessions(Path::new("/no/such/projects")).is_err());
    }

    #[test]
    fn test_build_record_prefers_log_timestamps() {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 5, 11, 0, 0).unwrap();
        let fs_time = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let aggregate = SessionAggregate {
            usage: TokenUsage::new(10, 5, 0, 0),
            cost_usd: 0.25,
            primary_family: Some("claude-opus-4.6".into()),
            started_at: Some(start),
            ended_at: Some(end),
            ..Default::default()
        };

        let times = (Some(fs_time), Some(fs_time));
        let record = build_record("m1", &session_file(), &aggregate, times);

        assert_eq!(record.machine_id, "m1");
        assert_eq!(record.model, "claude-opus-4.6");
        assert_eq!(record.session_start, start);
        assert_eq!(record.session_end, end);
        assert_eq!(record.cost_usd, 0.25);
    }

    #[test]
    fn test_build_record_falls_back_to_file_times() {
        let created = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
        let modified = Utc.with_ymd_and_hms(2026, 2, 1, 9, 30, 0).unwrap();
        let aggregate = SessionAggregate {
            usage: TokenUsage::new(10, 5, 0, 0),
            ..Default::default()
        };

        let times = (Some(created), Some(modified));
        let record = build_record("m1", &session_file(), &aggregate, times);
        assert_eq!(record.session_start, created);
        assert_eq!(record.session_end, modified);
        assert_eq!(record.model, DEFAULT_FAMILY);

        let record = build_record("m1", &session_file(), &aggregate, (None, Some(modified)));
        assert_eq!(record.session_start, modified);
    }

    #[test]
    fn test_render_session_report() {
        let aggregate = SessionAggregate {
            usage: TokenUsage::new(1000, 500, 200, 100),
            cost_usd: 0.01038,
            primary_family: Some("claude-sonnet-4".into()),
            families: vec![FamilyBreakdown {
                family: "claude-sonnet-4".into(),
                request_count: 1,
                usage: TokenUsage::new(1000, 500, 200, 100),
                cost_usd: 0.01038,
            }],
            ..Default::default()
        };

        let mut out = Vec::new();
        render_session_report(&mut out, &session_file(), &aggregate).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Session 0b7c (api)"));
        assert!(text.contains("input 1000 | output 500 | cache write 200 | cache read 100"));
        assert!(text.contains("| total 1800"));
        assert!(text.contains("claude-sonnet-4"));
        assert!(text.contains("total: $0.010380"));
    }
}
