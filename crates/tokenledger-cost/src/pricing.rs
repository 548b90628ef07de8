//! Model family resolution and cost calculation.
//!
//! Rates are USD per million tokens. A [`PricingTable`] is built once at
//! startup (remote rows merged over [`PricingTable::builtin`]) and then passed
//! by reference to everything that prices usage.

use std::collections::HashMap;

use crate::models::{PricingRecord, TokenUsage};

/// Family used for models that match no alias.
pub const DEFAULT_FAMILY: &str = "default";

const MILLION: f64 = 1_000_000.0;

/// Substring aliases checked in order; the first containing match wins.
/// Specific revisions must precede the generic alias they contain.
const FAMILY_ALIASES: &[(&str, &str)] = &[
    ("opus-4-6", "claude-opus-4.6"),
    ("opus-4-5", "claude-opus-4.5"),
    ("opus-4-1", "claude-opus-4.1"),
    ("opus", "claude-opus-4"),
    ("sonnet-4-6", "claude-sonnet-4.6"),
    ("sonnet-4-5", "claude-sonnet-4.5"),
    ("3-7-sonnet", "claude-3.7-sonnet"),
    ("sonnet", "claude-sonnet-4"),
    ("haiku-4-5", "claude-haiku-4.5"),
    ("3-5-haiku", "claude-3.5-haiku"),
    ("haiku", "claude-3-haiku"),
];

/// Every value [`resolve_family`] can return.
pub const KNOWN_FAMILIES: &[&str] = &[
    "claude-opus-4.6",
    "claude-opus-4.5",
    "claude-opus-4.1",
    "claude-opus-4",
    "claude-sonnet-4.6",
    "claude-sonnet-4.5",
    "claude-3.7-sonnet",
    "claude-sonnet-4",
    "claude-haiku-4.5",
    "claude-3.5-haiku",
    "claude-3-haiku",
    DEFAULT_FAMILY,
];

/// Map a free-text model identifier to its canonical family key.
pub fn resolve_family(model: &str) -> &'static str {
    let model = model.to_lowercase();
    FAMILY_ALIASES
        .iter()
        .find(|(alias, _)| model.contains(alias))
        .map(|(_, family)| *family)
        .unwrap_or(DEFAULT_FAMILY)
}

/// Per-million-token rates for one family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_write_per_million: f64,
}

impl ModelRates {
    /// Rates with the usual cache split: writes at 1.25x input, reads at 0.1x.
    pub fn new(input: f64, output: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
            cache_read_per_million: input * 0.1,
            cache_write_per_million: input * 1.25,
        }
    }

    pub fn with_cache(mut self, read: f64, write: f64) -> Self {
        self.cache_read_per_million = read;
        self.cache_write_per_million = write;
        self
    }
}

impl From<&PricingRecord> for ModelRates {
    fn from(record: &PricingRecord) -> Self {
        Self {
            input_per_million: record.input_per_m,
            output_per_million: record.output_per_m,
            cache_read_per_million: record.cache_read_per_m,
            cache_write_per_million: record.cache_write_per_m,
        }
    }
}

/// Compute the cost of one usage tuple, rounded to 6 decimals.
///
/// Input tokens that were actually cache reads or writes are billed only at
/// the cache rate; the remaining "normal" input is clamped at zero.
pub fn calculate_cost(usage: &TokenUsage, rates: &ModelRates) -> f64 {
    let normal_input = usage
        .input_tokens
        .saturating_sub(usage.cache_read_tokens)
        .saturating_sub(usage.cache_write_tokens);

    let cost = normal_input as f64 / MILLION * rates.input_per_million
        + usage.cache_write_tokens as f64 / MILLION * rates.cache_write_per_million
        + usage.cache_read_tokens as f64 / MILLION * rates.cache_read_per_million
        + usage.output_tokens as f64 / MILLION * rates.output_per_million;

    round_cost(cost)
}

/// Round a USD amount to 6 decimal places.
pub fn round_cost(value: f64) -> f64 {
    (value * MILLION).round() / MILLION
}

/// Family → rates lookup with a guaranteed `default` row.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<String, ModelRates>,
    fallback: ModelRates,
}

impl PricingTable {
    /// Compiled-in rates used offline and as the base for remote rows.
    pub fn builtin() -> Self {
        let opus_current = ModelRates::new(5.0, 25.0).with_cache(0.50, 6.25);
        let opus_legacy = ModelRates::new(15.0, 75.0).with_cache(1.50, 18.75);
        let sonnet = ModelRates::new(3.0, 15.0).with_cache(0.30, 3.75);

        let mut rates = HashMap::new();
        rates.insert("claude-opus-4.6".to_string(), opus_current);
        rates.insert("claude-opus-4.5".to_string(), opus_current);
        rates.insert("claude-opus-4.1".to_string(), opus_legacy);
        rates.insert("claude-opus-4".to_string(), opus_legacy);
        rates.insert("claude-sonnet-4.6".to_string(), sonnet);
        rates.insert("claude-sonnet-4.5".to_string(), sonnet);
        rates.insert("claude-3.7-sonnet".to_string(), sonnet);
        rates.insert("claude-sonnet-4".to_string(), sonnet);
        rates.insert(
            "claude-haiku-4.5".to_string(),
            ModelRates::new(1.0, 5.0).with_cache(0.10, 1.25),
        );
        rates.insert(
            "claude-3.5-haiku".to_string(),
            ModelRates::new(0.80, 4.0).with_cache(0.08, 1.0),
        );
        rates.insert(
            "claude-3-haiku".to_string(),
            ModelRates::new(0.25, 1.25).with_cache(0.03, 0.30),
        );
        rates.insert(DEFAULT_FAMILY.to_string(), sonnet);

        Self {
            rates,
            fallback: sonnet,
        }
    }

    /// Built-in table with `records` layered on top.
    pub fn with_records(records: &[PricingRecord]) -> Self {
        let mut table = Self::builtin();
        table.merge_records(records);
        table
    }

    /// Insert or replace rows. A remote `default` row also replaces the fallback.
    pub fn merge_records(&mut self, records: &[PricingRecord]) -> usize {
        for record in records {
            let rates = ModelRates::from(record);
            if record.model_family == DEFAULT_FAMILY {
                self.fallback = rates;
            }
            self.rates.insert(record.model_family.clone(), rates);
        }
        records.len()
    }

    /// Rates for `family`, falling back to the default row.
    pub fn rates_for(&self, family: &str) -> &ModelRates {
        self.rates.get(family).unwrap_or(&self.fallback)
    }

    /// Whether `family` has its own row.
    pub fn contains(&self, family: &str) -> bool {
        self.rates.contains_key(family)
    }

    /// Cost of `usage` priced as `family`.
    pub fn cost_for(&self, family: &str, usage: &TokenUsage) -> f64 {
        calculate_cost(usage, self.rates_for(family))
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}
