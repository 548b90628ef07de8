//! Remote store client.
//!
//! The store exposes a PostgREST-style API. Writes are upserts: usage rows
//! merge on `(machine_id, session_id)` and pricing rows merge on
//! `model_family`, so repeating a write never creates a duplicate row.
//!
//! ## Example
//!
//! ```no_run
//! use tokenledger_cost::store::{RestStore, UsageStore};
//!
//! # async fn example() -> tokenledger_cost::Result<()> {
//! let store = RestStore::new("https://project.supabase.co", "service-key", 30)?;
//! let rows = store.fetch_pricing().await?;
//! println!("{} pricing rows", rows.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{CostError, Result};
use crate::models::{PricingRecord, UsageRecord};

/// Remote table holding one row per (machine, session).
pub const USAGE_TABLE: &str = "usage_records";

/// Remote table holding one row per model family.
pub const PRICING_TABLE: &str = "model_pricing";

/// Destination for usage rows and source of pricing rows.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Insert or merge one session row keyed by `(machine_id, session_id)`.
    async fn upsert_usage(&self, record: &UsageRecord) -> Result<()>;

    /// Insert or merge pricing rows keyed by `model_family`.
    async fn upsert_pricing(&self, records: &[PricingRecord]) -> Result<usize>;

    /// Read every pricing row.
    async fn fetch_pricing(&self) -> Result<Vec<PricingRecord>>;
}

/// [`UsageStore`] backed by HTTP requests.
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn upsert<T: serde::Serialize + Sync>(
        &self,
        table: &str,
        conflict_columns: &str,
        rows: &[T],
    ) -> Result<()> {
        debug!(table, rows = rows.len(), "upserting rows");

        let response = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", conflict_columns)])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await?;

        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    Err(CostError::Store {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl UsageStore for RestStore {
    async fn upsert_usage(&self, record: &UsageRecord) -> Result<()> {
        self.upsert(USAGE_TABLE, "machine_id,session_id", std::slice::from_ref(record))
            .await
    }

    async fn upsert_pricing(&self, records: &[PricingRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.upsert(PRICING_TABLE, "model_family", records).await?;
        Ok(records.len())
    }

    async fn fetch_pricing(&self) -> Result<Vec<PricingRecord>> {
        let response = self
            .client
            .get(self.table_url(PRICING_TABLE))
            .query(&[("select", "*")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let rows = check_status(response).await?.json().await?;
        Ok(rows)
    }
}
