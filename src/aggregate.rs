//! Aggregation across sources
//!
//! The [`Aggregator`] holds one [`RefreshController`] per configured source
//! and sums their counts into an [`AggregateResult`]. Source refreshes run
//! concurrently; the result is assembled only once every source has answered.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::cache::{is_fresh, CacheEntry, CacheError, CacheStore};
use crate::config::{Config, ConfigError};
use crate::refresh::{CountReading, RefreshController, RetryPolicy};
use crate::sources::{build_provider, http_client, parse_grouped_count};

/// Rejected manual override input
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("count is empty")]
    Empty,

    #[error("count must not be negative: '{0}'")]
    Negative(String),

    #[error("count is not a number: '{0}'")]
    NotANumber(String),
}

/// Errors surfaced by aggregator operations
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error(transparent)]
    Persistence(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Parses operator input for a manual override
///
/// Thousands separators are accepted (`1 405 124`, `1,405,124`).
pub fn parse_override_count(text: &str) -> Result<u64, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    if trimmed.starts_with('-') {
        return Err(ValidationError::Negative(trimmed.to_string()));
    }
    parse_grouped_count(trimmed).ok_or_else(|| ValidationError::NotANumber(trimmed.to_string()))
}

/// Sum of all sources at one point in time; never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    /// Per-source readings, in configuration order
    pub sources: Vec<CountReading>,
    pub total: u64,
    pub computed_at: DateTime<Utc>,
}

impl AggregateResult {
    pub fn from_readings(sources: Vec<CountReading>, computed_at: DateTime<Utc>) -> Self {
        let total = sources
            .iter()
            .fold(0u64, |acc, reading| acc.saturating_add(reading.count));
        Self {
            sources,
            total,
            computed_at,
        }
    }

    /// Source id to count
    pub fn per_source(&self) -> BTreeMap<&str, u64> {
        self.sources
            .iter()
            .map(|r| (r.source.as_str(), r.count))
            .collect()
    }

    /// Whether any source contributed a degraded value
    pub fn is_estimate(&self) -> bool {
        self.sources.iter().any(|r| r.is_estimate)
    }
}

/// Stored state of one source, as shown by `snapshot`
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRow {
    pub source: String,
    pub entry: Option<CacheEntry>,
    pub is_fresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Entry point for reading and refreshing the total
#[derive(Debug)]
pub struct Aggregator {
    controllers: Vec<Arc<RefreshController>>,
}

impl Aggregator {
    pub fn new(controllers: Vec<RefreshController>) -> Self {
        Self {
            controllers: controllers.into_iter().map(Arc::new).collect(),
        }
    }

    /// Builds one controller per configured source over a shared cache
    pub fn from_config(config: &Config, cache: CacheStore) -> Result<Self, AggregateError> {
        config.validate()?;

        let client = http_client()?;
        let retry = RetryPolicy::from(&config.retry);

        let mut controllers = Vec::with_capacity(config.sources.len());
        for source in &config.sources {
            let provider = build_provider(&source.provider, &client);
            let controller =
                RefreshController::new(&source.id, provider, cache.clone(), source.fallback_policy()?)
                    .with_ttl(source.ttl())
                    .with_fetch_timeout(config.fetch_timeout())
                    .with_retry(retry);
            controllers.push(controller);
        }

        Ok(Self::new(controllers))
    }

    /// Configured source ids, in order
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.controllers.iter().map(|c| c.source())
    }

    /// Cache-first total
    pub async fn get_total(&self) -> AggregateResult {
        let readings = join_all(self.controllers.iter().map(|c| c.get_count())).await;
        AggregateResult::from_readings(readings, Utc::now())
    }

    /// Total with every source refreshed
    pub async fn force_refresh_all(&self) -> AggregateResult {
        info!(sources = self.controllers.len(), "Forcing refresh of all sources");
        let readings = join_all(self.controllers.iter().map(|c| c.force_refresh())).await;
        AggregateResult::from_readings(readings, Utc::now())
    }

    /// Refreshes one source, ignoring its cache freshness
    pub async fn force_refresh(&self, source: &str) -> Result<CountReading, AggregateError> {
        Ok(self.controller(source)?.force_refresh().await)
    }

    /// Stores an operator-supplied count for `source`
    pub async fn set_manual_override(
        &self,
        source: &str,
        count: u64,
    ) -> Result<CountReading, AggregateError> {
        let controller = self.controller(source)?;
        Ok(controller.set_manual_override(count).await?)
    }

    /// Drops the stored entry for `source`
    pub async fn clear(&self, source: &str) -> Result<(), AggregateError> {
        Ok(self.controller(source)?.clear().await?)
    }

    /// What is currently stored for each source, without fetching
    pub fn snapshot(&self) -> Vec<SnapshotRow> {
        let now = Utc::now();
        self.controllers
            .iter()
            .map(|c| match c.cached() {
                Ok(entry) => SnapshotRow {
                    source: c.source().to_string(),
                    is_fresh: entry.as_ref().is_some_and(|e| is_fresh(e, c.ttl(), now)),
                    entry,
                    error: None,
                },
                Err(e) => SnapshotRow {
                    source: c.source().to_string(),
                    entry: None,
                    is_fresh: false,
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }

    fn controller(&self, source: &str) -> Result<&RefreshController, AggregateError> {
        self.controllers
            .iter()
            .find(|c| c.source() == source)
            .map(|c| c.as_ref())
            .ok_or_else(|| AggregateError::UnknownSource(source.to_string()))
    }
}
