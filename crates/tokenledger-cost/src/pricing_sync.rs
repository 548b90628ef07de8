//! Remote pricing: loading it for ingestion and refreshing it from a public dataset.
//!
//! The dataset is LiteLLM's `model_prices_and_context_window.json`, a map of
//! model key to per-token costs. Only directly hosted Anthropic chat models are
//! kept; each is reduced to a family key (`claude-3-5-sonnet-20241022` →
//! `claude-3.5-sonnet`) and converted to per-million rates before being
//! upserted into the `model_pricing` table.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{CostError, Result};
use crate::models::PricingRecord;
use crate::pricing::PricingTable;
use crate::store::UsageStore;

const MILLION: f64 = 1_000_000.0;

/// Provider value of directly hosted entries.
const DIRECT_PROVIDER: &str = "anthropic";

/// Legacy model names that never appear in current session logs.
const LEGACY_PREFIXES: &[&str] = &["claude-2", "claude-instant"];

#[derive(Debug, Clone, Default, Deserialize)]
struct DatasetEntry {
    litellm_provider: Option<String>,
    mode: Option<String>,
    input_cost_per_token: Option<f64>,
    output_cost_per_token: Option<f64>,
    cache_read_input_token_cost: Option<f64>,
    cache_creation_input_token_cost: Option<f64>,
}

/// Build the pricing table for a run: remote rows over the built-in table.
///
/// A store failure is not fatal; the built-in rates are used instead.
pub async fn load_pricing_table(store: &dyn UsageStore) -> PricingTable {
    match store.fetch_pricing().await {
        Ok(records) => {
            info!(rows = records.len(), "loaded remote pricing");
            PricingTable::with_records(&records)
        }
        Err(e) => {
            warn!(error = %e, "failed to load remote pricing; using built-in rates");
            PricingTable::builtin()
        }
    }
}

/// Fetch the public dataset and upsert the derived family rows.
pub async fn sync_remote_pricing(
    dataset_url: &str,
    timeout_secs: u64,
    store: &dyn UsageStore,
) -> Result<usize> {
    let records = fetch_pricing_records(dataset_url, timeout_secs).await?;
    if records.is_empty() {
        return Err(CostError::Pricing(format!(
            "no usable entries in pricing dataset {dataset_url}"
        )));
    }

    let count = store.upsert_pricing(&records).await?;
    info!(count, "upserted model pricing");
    Ok(count)
}

/// Download the dataset and reduce it to family pricing rows.
pub async fn fetch_pricing_records(
    dataset_url: &str,
    timeout_secs: u64,
) -> Result<Vec<PricingRecord>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()?;

    let response = client.get(dataset_url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CostError::Pricing(format!(
            "pricing dataset request failed with {status}"
        )));
    }

    let raw: HashMap<String, Value> = response.json().await?;
    debug!(entries = raw.len(), "fetched pricing dataset");
    Ok(build_pricing_records(raw))
}

/// Filter, deduplicate, and convert raw dataset entries.
///
/// Keys are visited in sorted order and later keys overwrite earlier ones for
/// the same family, so the most recent dated revision supplies the rates.
pub fn build_pricing_records(raw: HashMap<String, Value>) -> Vec<PricingRecord> {
    let sorted: BTreeMap<String, Value> = raw.into_iter().collect();
    let mut by_family: BTreeMap<String, PricingRecord> = BTreeMap::new();

    for (key, value) in sorted {
        let Ok(entry) = serde_json::from_value::<DatasetEntry>(value) else {
            continue;
        };
        if !is_direct_chat_entry(&key, &entry) {
            continue;
        }
        let Some(family) = family_key(&key) else {
            continue;
        };
        let Some(record) = to_record(&family, &entry) else {
            continue;
        };
        by_family.insert(family, record);
    }

    by_family.into_values().collect()
}

fn is_direct_chat_entry(key: &str, entry: &DatasetEntry) -> bool {
    let key = key.to_lowercase();
    entry.litellm_provider.as_deref() == Some(DIRECT_PROVIDER)
        && entry.mode.as_deref() == Some("chat")
        && key.starts_with("claude-")
        && !key.contains('/')
        && !key.ends_with("-latest")
        && !LEGACY_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

/// Derive the family key from a dataset model key.
///
/// Strips a trailing `YYYYMMDD` date and joins adjacent single-number version
/// segments with a dot: `claude-opus-4-1-20250805` → `claude-opus-4.1`.
pub fn family_key(model: &str) -> Option<String> {
    let lower = model.trim().to_lowercase();
    let mut segments: Vec<&str> = lower.split('-').filter(|s| !s.is_empty()).collect();

    if segments
        .last()
        .is_some_and(|s| s.len() == 8 && s.chars().all(|c| c.is_ascii_digit()))
    {
        segments.pop();
    }

    let is_version =
        |s: &str| !s.is_empty() && s.len() <= 2 && s.chars().all(|c| c.is_ascii_digit());

    let mut out: Vec<String> = Vec::with_capacity(segments.len());
    for segment in segments {
        let joins_version = out
            .last()
            .is_some_and(|prev| is_version(prev.as_str()) && is_version(segment));
        if joins_version && let Some(prev) = out.last_mut() {
            prev.push('.');
            prev.push_str(segment);
        } else {
            out.push(segment.to_string());
        }
    }

    if out.len() < 2 {
        return None;
    }
    Some(out.join("-"))
}

fn to_record(family: &str, entry: &DatasetEntry) -> Option<PricingRecord> {
    let input = entry.input_cost_per_token?;
    let output = entry.output_cost_per_token?;

    Some(PricingRecord {
        model_family: family.to_string(),
        input_per_m: per_million(input),
        output_per_m: per_million(output),
        cache_read_per_m: per_million(entry.cache_read_input_token_cost.unwrap_or(0.0)),
        cache_write_per_m: per_million(entry.cache_creation_input_token_cost.unwrap_or(0.0)),
    })
}

/// Per-token cost to per-million, rounded to 4 decimals.
fn per_million(per_token: f64) -> f64 {
    (per_token * MILLION * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn anthropic(input: f64, output: f64) -> Value {
        json!({
            "litellm_provider": "anthropic",
            "mode": "chat",
            "input_cost_per_token": input,
            "output_cost_per_token": output,
            "cache_read_input_token_cost": input / 10.0,
            "cache_creation_input_token_cost": input * 1.25,
        })
    }

    #[test]
    fn test_family_key_normalization() {
        assert_eq!(family_key("claude-sonnet-4-20250514").as_deref(), Some("claude-sonnet-4"));
        assert_eq!(family_key("claude-3-5-sonnet-20241022").as_deref(), Some("claude-3.5-sonnet"));
        assert_eq!(family_key("claude-opus-4-1-20250805").as_deref(), Some("claude-opus-4.1"));
        assert_eq!(family_key("claude-3-7-sonnet-20250219").as_deref(), Some("claude-3.7-sonnet"));
        assert_eq!(family_key("claude-haiku-4-5").as_deref(), Some("claude-haiku-4.5"));
        assert_eq!(family_key("claude-3-haiku-20240307").as_deref(), Some("claude-3-haiku"));
        assert_eq!(family_key("claude"), None);
    }

    #[test]
    fn test_build_records_filters_and_converts() {
        let mut raw = HashMap::new();
        raw.insert("claude-sonnet-4-20250514".to_string(), anthropic(3e-6, 1.5e-5));
        raw.insert("claude-3-5-haiku-latest".to_string(), anthropic(8e-7, 4e-6));
        raw.insert("anthropic/claude-opus-4-1".to_string(), anthropic(1.5e-5, 7.5e-5));
        raw.insert("claude-instant-1.2".to_string(), anthropic(8e-7, 2.4e-6));
        raw.insert(
            "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            json!({"litellm_provider": "bedrock", "mode": "chat", "input_cost_per_token": 2.5e-7, "output_cost_per_token": 1.25e-6}),
        );
        raw.insert(
            "claude-embed".to_string(),
            json!({"litellm_provider": "anthropic", "mode": "embedding", "input_cost_per_token": 1e-7, "output_cost_per_token": 0.0}),
        );
        raw.insert("sample_spec".to_string(), json!({"max_tokens": "LEGACY parameter"}));

        let records = build_pricing_records(raw);

        assert_eq!(records.len(), 1);
        let sonnet = &records[0];
        assert_eq!(sonnet.model_family, "claude-sonnet-4");
        assert_eq!(sonnet.input_per_m, 3.0);
        assert_eq!(sonnet.output_per_m, 15.0);
        assert_eq!(sonnet.cache_read_per_m, 0.3);
        assert_eq!(sonnet.cache_write_per_m, 3.75);
    }

    #[test]
    fn test_latest_dated_revision_wins() {
        let mut raw = HashMap::new();
        raw.insert("claude-3-5-sonnet-20240620".to_string(), anthropic(1e-6, 1e-6));
        raw.insert("claude-3-5-sonnet-20241022".to_string(), anthropic(3e-6, 1.5e-5));

        let records = build_pricing_records(raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model_family, "claude-3.5-sonnet");
        assert_eq!(records[0].input_per_m, 3.0);
    }

    #[test]
    fn test_missing_cache_costs_default_to_zero() {
        let mut raw = HashMap::new();
        raw.insert(
            "claude-opus-4-6".to_string(),
            json!({"litellm_provider": "anthropic", "mode": "chat", "input_cost_per_token": 5e-6, "output_cost_per_token": 2.5e-5}),
        );

        let records = build_pricing_records(raw);
        assert_eq!(records[0].model_family, "claude-opus-4.6");
        assert_eq!(records[0].cache_read_per_m, 0.0);
        assert_eq!(records[0].cache_write_per_m, 0.0);
    }

    #[test]
    fn test_per_million_rounds_to_four_places() {
        assert_eq!(per_million(3.0000004e-6), 3.0);
        assert_eq!(per_million(1.23456e-7), 0.1235);
    }
}
