//! Session log parser.
//!
//! A session log is line-delimited JSON. Two event shapes carry usage:
//!
//! - direct: `{"timestamp", "requestId", "message": {"model", "usage"}}`
//! - nested: `{"timestamp", "data": {"message": {"requestId", "message": {"model", "usage"}}}}`
//!
//! Lines that are not JSON are dropped (logs may be truncated mid-write) and
//! counted in [`ParseStats::skipped_lines`]. Repeated request ids keep the
//! last usage written for them.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::Result;
use crate::models::{FamilyBreakdown, ParseStats, SessionAggregate, TokenUsage, UsageEntry};
use crate::pricing::{PricingTable, resolve_family, round_cost};

/// Model name recorded when a usage event has none.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Why a line contributed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Empty or whitespace-only line
    Blank,
    /// Line is not a JSON value
    InvalidJson,
}

/// Result of parsing one log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Line carries usage for a request
    Usage {
        entry: UsageEntry,
        timestamp: Option<DateTime<Utc>>,
    },
    /// Valid event without usage; only its timestamp matters
    Event { timestamp: Option<DateTime<Utc>> },
    /// Line was dropped
    Skipped(SkipReason),
}

/// Parse a single log line.
pub fn parse_line(line: &str) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() {
        return LineOutcome::Skipped(SkipReason::Blank);
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => return LineOutcome::Skipped(SkipReason::InvalidJson),
    };

    let timestamp = extract_timestamp(&value);
    match extract_usage(&value) {
        Some(entry) => LineOutcome::Usage { entry, timestamp },
        None => LineOutcome::Event { timestamp },
    }
}

fn extract_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.get("timestamp")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Direct shape first; the nested shape is only consulted when it does not match.
fn extract_usage(value: &Value) -> Option<UsageEntry> {
    direct_usage(value).or_else(|| nested_usage(value))
}

fn direct_usage(value: &Value) -> Option<UsageEntry> {
    let request_id = request_id(value)?;
    entry_from_message(request_id, value.get("message")?)
}

fn nested_usage(value: &Value) -> Option<UsageEntry> {
    let outer = value.get("data")?.get("message")?;
    let request_id = request_id(outer)?;
    entry_from_message(request_id, outer.get("message")?)
}

fn request_id(value: &Value) -> Option<&str> {
    value
        .get("requestId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

fn entry_from_message(request_id: &str, message: &Value) -> Option<UsageEntry> {
    let usage = message.get("usage").filter(|u| u.is_object())?;
    let model = message
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_MODEL);

    Some(UsageEntry {
        request_id: request_id.to_string(),
        model: model.to_string(),
        usage: parse_usage_tokens(usage),
    })
}

fn parse_usage_tokens(usage: &Value) -> TokenUsage {
    let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);
    TokenUsage {
        input_tokens: field("input_tokens"),
        output_tokens: field("output_tokens"),
        cache_write_tokens: field("cache_creation_input_tokens"),
        cache_read_tokens: field("cache_read_input_tokens"),
    }
}

/// Builds a [`SessionAggregate`] from a session log.
pub struct SessionParser<'a> {
    pricing: &'a PricingTable,
}

impl<'a> SessionParser<'a> {
    pub fn new(pricing: &'a PricingTable) -> Self {
        Self { pricing }
    }

    /// Parse a session log file.
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<SessionAggregate> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut acc = SessionAccumulator::default();

        for (index, line) in reader.lines().enumerate() {
            match line {
                Ok(line) => acc.push(parse_line(&line)),
                Err(e) => {
                    trace!(line = index + 1, error = %e, "unreadable line");
                    acc.push(LineOutcome::Skipped(SkipReason::InvalidJson));
                }
            }
        }

        let aggregate = acc.finish(self.pricing);
        debug!(
            file = %path.display(),
            lines = aggregate.stats.lines,
            skipped = aggregate.stats.skipped_lines,
            requests = aggregate.stats.unique_requests,
            cost_usd = aggregate.cost_usd,
            "parsed session log"
        );
        Ok(aggregate)
    }

    /// Parse session log content already in memory.
    pub fn parse_str(&self, content: &str) -> SessionAggregate {
        let mut acc = SessionAccumulator::default();
        for line in content.lines() {
            acc.push(parse_line(line));
        }
        acc.finish(self.pricing)
    }
}

/// Running state while a file is read line by line.
#[derive(Default)]
struct SessionAccumulator {
    /// Request ids in first-seen order
    order: Vec<String>,
    requests: HashMap<String, UsageEntry>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    stats: ParseStats,
}

impl SessionAccumulator {
    fn push(&mut self, outcome: LineOutcome) {
        let timestamp = match outcome {
            LineOutcome::Skipped(SkipReason::Blank) => return,
            LineOutcome::Skipped(SkipReason::InvalidJson) => {
                self.stats.lines += 1;
                self.stats.skipped_lines += 1;
                return;
            }
            LineOutcome::Event { timestamp } => timestamp,
            LineOutcome::Usage { entry, timestamp } => {
                self.stats.usage_events += 1;
                if !self.requests.contains_key(&entry.request_id) {
                    self.order.push(entry.request_id.clone());
                }
                self.requests.insert(entry.request_id.clone(), entry);
                timestamp
            }
        };

        self.stats.lines += 1;
        if let Some(ts) = timestamp {
            self.started_at = Some(self.started_at.map_or(ts, |start| start.min(ts)));
            self.ended_at = Some(self.ended_at.map_or(ts, |end| end.max(ts)));
        }
    }

    fn finish(mut self, pricing: &PricingTable) -> SessionAggregate {
        let mut usage = TokenUsage::default();
        let mut cost_usd = 0.0;
        let mut families: Vec<FamilyBreakdown> = Vec::new();

        for request_id in &self.order {
            let Some(entry) = self.requests.remove(request_id) else {
                continue;
            };
            let family = resolve_family(&entry.model);
            let cost = pricing.cost_for(family, &entry.usage);

            usage.add(&entry.usage);
            cost_usd += cost;

            match families.iter_mut().find(|f| f.family == family) {
                Some(breakdown) => {
                    breakdown.request_count += 1;
                    breakdown.usage.add(&entry.usage);
                    breakdown.cost_usd += cost;
                }
                None => families.push(FamilyBreakdown {
                    family: family.to_string(),
                    request_count: 1,
                    usage: entry.usage,
                    cost_usd: cost,
                }),
            }
        }

        for breakdown in &mut families {
            breakdown.cost_usd = round_cost(breakdown.cost_usd);
        }

        let mut primary: Option<&FamilyBreakdown> = None;
        for breakdown in &families {
            if primary.is_none_or(|best| breakdown.request_count > best.request_count) {
                primary = Some(breakdown);
            }
        }
        let primary_family = primary.map(|b| b.family.clone());

        self.stats.unique_requests = self.order.len();

        SessionAggregate {
            usage,
            cost_usd: round_cost(cost_usd),
            primary_family,
            families,
            started_at: self.started_at,
            ended_at: self.ended_at,
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_direct_line() {
        let line = r#"{"type":"assistant","timestamp":"2026-01-05T10:00:00.000Z","requestId":"req_01","message":{"model":"claude-sonnet-4-20250514","usage":{"input_tokens":1000,"output_tokens":500,"cache_creation_input_tokens":200,"cache_read_input_tokens":100}}}"#;

        match parse_line(line) {
            LineOutcome::Usage { entry, timestamp } => {
                assert_eq!(entry.request_id, "req_01");
                assert_eq!(entry.model, "claude-sonnet-4-20250514");
                assert_eq!(entry.usage, TokenUsage::new(1000, 500, 200, 100));
                assert_eq!(timestamp, Some(ts("2026-01-05T10:00:00Z")));
            }
            other => panic!("expected usage, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_nested_line() {
        let line = r#"{"type":"progress","timestamp":"2026-01-05T10:01:00Z","data":{"message":{"requestId":"req_sub","message":{"model":"claude-haiku-4-5-20251001","usage":{"input_tokens":40,"output_tokens":7}}}}}"#;

        match parse_line(line) {
            LineOutcome::Usage { entry, .. } => {
                assert_eq!(entry.request_id, "req_sub");
                assert_eq!(entry.model, "claude-haiku-4-5-20251001");
                assert_eq!(entry.usage, TokenUsage::new(40, 7, 0, 0));
            }
            other => panic!("expected usage, got {other:?}"),
        }
    }

    #[test]
    fn test_direct_shape_wins_over_nested() {
        let line = r#"{"requestId":"outer","message":{"model":"claude-opus-4-6","usage":{"input_tokens":1}},"data":{"message":{"requestId":"inner","message":{"model":"claude-haiku","usage":{"input_tokens":99}}}}}"#;

        match parse_line(line) {
            LineOutcome::Usage { entry, .. } => {
                assert_eq!(entry.request_id, "outer");
                assert_eq!(entry.usage.input_tokens, 1);
            }
            other => panic!("expected usage, got {other:?}"),
        }
    }

    #[test]
    fn test_usage_without_request_id_is_plain_event() {
        let line = r#"{"timestamp":"2026-01-05T10:00:00Z","message":{"model":"claude-sonnet-4","usage":{"input_tokens":5}}}"#;
        assert!(matches!(parse_line(line), LineOutcome::Event { timestamp: Some(_) }));
    }

    #[test]
    fn test_missing_model_and_fields_default() {
        let line = r#"{"requestId":"r","message":{"usage":{}}}"#;
        match parse_line(line) {
            LineOutcome::Usage { entry, timestamp } => {
                assert_eq!(entry.model, UNKNOWN_MODEL);
                assert_eq!(entry.usage, TokenUsage::default());
                assert!(timestamp.is_none());
            }
            other => panic!("expected usage, got {other:?}"),
        }
    }

    #[test]
    fn test_skip_reasons() {
        assert_eq!(parse_line("   "), LineOutcome::Skipped(SkipReason::Blank));
        assert_eq!(
            parse_line(r#"{"requestId":"r","message":{"usa"#),
            LineOutcome::Skipped(SkipReason::InvalidJson)
        );
    }

    #[test]
    fn test_duplicate_request_keeps_last_usage() {
        let pricing = PricingTable::builtin();
        let content = r#"{"requestId":"req_1","message":{"model":"claude-sonnet-4","usage":{"input_tokens":100,"output_tokens":10}}}
{"requestId":"req_1","message":{"model":"claude-sonnet-4","usage":{"input_tokens":300,"output_tokens":40}}}"#;

        let aggregate = SessionParser::new(&pricing).parse_str(content);

        assert_eq!(aggregate.usage, TokenUsage::new(300, 40, 0, 0));
        assert_eq!(aggregate.stats.usage_events, 2);
        assert_eq!(aggregate.stats.unique_requests, 1);
        assert_eq!(aggregate.families.len(), 1);
        assert_eq!(aggregate.families[0].request_count, 1);
    }

    #[test]
    fn test_session_span_includes_non_usage_lines() {
        let pricing = PricingTable::builtin();
        let content = r#"{"type":"user","timestamp":"2026-01-05T09:00:00Z"}
{"timestamp":"2026-01-05T10:00:00Z","requestId":"a","message":{"model":"claude-sonnet-4","usage":{"input_tokens":10,"output_tokens":1}}}
{"type":"summary","timestamp":"2026-01-05T12:30:00Z"}
{"type":"bad","timestamp":"not a time"}"#;

        let aggregate = SessionParser::new(&pricing).parse_str(content);

        assert_eq!(aggregate.started_at, Some(ts("2026-01-05T09:00:00Z")));
        assert_eq!(aggregate.ended_at, Some(ts("2026-01-05T12:30:00Z")));
    }

    #[test]
    fn test_malformed_lines_are_counted_not_fatal() {
        let pricing = PricingTable::builtin();
        let content = "not json\n{\"requestId\":\"a\",\"message\":{\"model\":\"claude-opus-4-6\",\"usage\":{\"output_tokens\":3}}}\n{truncated";

        let aggregate = SessionParser::new(&pricing).parse_str(content);

        assert_eq!(aggregate.stats.lines, 3);
        assert_eq!(aggregate.stats.skipped_lines, 2);
        assert_eq!(aggregate.usage.output_tokens, 3);
    }

    #[test]
    fn test_per_family_costs_and_primary() {
        let pricing = PricingTable::builtin();
        let content = r#"{"requestId":"a","message":{"model":"claude-haiku-4-5-20251001","usage":{"input_tokens":1000000}}}
{"requestId":"b","message":{"model":"claude-opus-4-6","usage":{"output_tokens":1000000}}}
{"requestId":"c","message":{"model":"claude-opus-4-6","usage":{"input_tokens":1000000}}}"#;

        let aggregate = SessionParser::new(&pricing).parse_str(content);

        assert_eq!(aggregate.primary_family.as_deref(), Some("claude-opus-4.6"));
        assert_eq!(aggregate.families[0].family, "claude-haiku-4.5");
        assert!((aggregate.families[0].cost_usd - 1.0).abs() < 1e-9);
        assert_eq!(aggregate.families[1].request_count, 2);
        assert!((aggregate.families[1].cost_usd - 30.0).abs() < 1e-9);
        assert!((aggregate.cost_usd - 31.0).abs() < 1e-9);
    }

    #[test]
    fn test_primary_tie_breaks_by_first_encountered() {
        let pricing = PricingTable::builtin();
        let content = r#"{"requestId":"a","message":{"model":"claude-sonnet-4-5","usage":{"input_tokens":1}}}
{"requestId":"b","message":{"model":"claude-opus-4-5","usage":{"input_tokens":1}}}"#;

        let aggregate = SessionParser::new(&pricing).parse_str(content);
        assert_eq!(aggregate.primary_family.as_deref(), Some("claude-sonnet-4.5"));
    }

    #[test]
    fn test_empty_session_with_timestamps() {
        let pricing = PricingTable::builtin();
        let content = r#"{"type":"user","timestamp":"2026-01-05T09:00:00Z"}
{"type":"assistant","timestamp":"2026-01-05T09:00:05Z","message":{"content":[]}}"#;

        let aggregate = SessionParser::new(&pricing).parse_str(content);

        assert!(aggregate.is_empty());
        assert_eq!(aggregate.usage, TokenUsage::default());
        assert!(aggregate.primary_family.is_none());
        assert!(aggregate.started_at.is_some());
    }
}
