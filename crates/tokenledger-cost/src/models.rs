//! Data models for session usage and cost attribution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token counts for one request or a whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Raw input tokens as reported by the API
    pub input_tokens: u64,

    /// Output tokens
    pub output_tokens: u64,

    /// Tokens written to the prompt cache (`cache_creation_input_tokens`)
    pub cache_write_tokens: u64,

    /// Tokens served from the prompt cache (`cache_read_input_tokens`)
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64, cache_write: u64, cache_read: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
            cache_write_tokens: cache_write,
            cache_read_tokens: cache_read,
        }
    }

    /// Add another usage tuple into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_write_tokens = self.cache_write_tokens.saturating_add(other.cache_write_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(other.cache_read_tokens);
    }

    /// True when neither input nor output tokens were used.
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }

    /// Total tokens (input + output + cache).
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_write_tokens)
            .saturating_add(self.cache_read_tokens)
    }
}

/// One usage-bearing request extracted from a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEntry {
    /// Logical request identifier used for deduplication
    pub request_id: String,

    /// Model identifier as written in the log (e.g. "claude-sonnet-4-20250514")
    pub model: String,

    /// Token usage for the request
    pub usage: TokenUsage,
}

/// Usage and cost attributed to one model family within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyBreakdown {
    /// Canonical family key
    pub family: String,

    /// Number of deduplicated requests
    pub request_count: u64,

    /// Summed usage
    pub usage: TokenUsage,

    /// Summed cost in USD
    pub cost_usd: f64,
}

/// Line-level counters collected while parsing one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Non-blank lines seen
    pub lines: usize,

    /// Lines dropped because they were not valid JSON
    pub skipped_lines: usize,

    /// Lines that carried usage data (before deduplication)
    pub usage_events: usize,

    /// Distinct request ids retained
    pub unique_requests: usize,
}

/// Per-file rollup of a session log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionAggregate {
    /// Sum over deduplicated requests
    pub usage: TokenUsage,

    /// Sum of per-request costs in USD
    pub cost_usd: f64,

    /// Family with the most requests
    pub primary_family: Option<String>,

    /// Per-family totals in first-encountered order
    pub families: Vec<FamilyBreakdown>,

    /// Earliest timestamp on any line
    pub started_at: Option<DateTime<Utc>>,

    /// Latest timestamp on any line
    pub ended_at: Option<DateTime<Utc>>,

    /// Parser counters
    pub stats: ParseStats,
}

impl SessionAggregate {
    /// A session without input or output tokens is never uploaded.
    pub fn is_empty(&self) -> bool {
        self.usage.is_empty()
    }
}

/// One row of the remote `usage_records` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub machine_id: String,
    pub session_id: String,
    pub model: String,
    pub project_slug: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
}

/// One row of the remote `model_pricing` table, rates in USD per million tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRecord {
    pub model_family: String,
    pub input_per_m: f64,
    pub output_per_m: f64,
    pub cache_read_per_m: f64,
    pub cache_write_per_m: f64,
}
