//! Per-source refresh control
//!
//! A [`RefreshController`] owns everything needed to answer "what is this
//! source's count right now": the cache key and TTL, the provider, the
//! fallback chain and the retry policy. It serves fresh cache entries
//! without I/O, and otherwise runs a single refresh at a time per source.
//! Callers that arrive while a refresh is in flight wait for it and share
//! its result instead of issuing their own fetch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{is_fresh, CacheEntry, CacheError, CacheStore};
use crate::config::RetryConfig;
use crate::fallback::{FallbackKind, FallbackPolicy};
use crate::sources::{FetchError, SourceProvider};

/// Default cache validity when none is configured
const DEFAULT_TTL_SECS: i64 = 3600;

/// Default deadline for one fetch attempt
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// How many attempts a refresh makes and how long it waits between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Where a returned count came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "from", content = "step")]
pub enum ReadingOrigin {
    /// Served from a fresh cache entry
    Cache,
    /// Fetched from the source during this call
    Fetch,
    /// Produced by the fallback chain after a failed fetch
    Fallback(FallbackKind),
    /// Written by an operator
    Manual,
}

/// A source's count as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountReading {
    pub source: String,
    pub count: u64,
    pub observed_at: DateTime<Utc>,
    pub is_estimate: bool,
    pub is_manual_override: bool,
    pub origin: ReadingOrigin,
}

impl CountReading {
    fn new(source: &str, entry: &CacheEntry, origin: ReadingOrigin) -> Self {
        Self {
            source: source.to_string(),
            count: entry.count,
            observed_at: entry.observed_at,
            is_estimate: entry.is_estimate,
            is_manual_override: entry.is_manual_override,
            origin,
        }
    }
}

/// Refresh state for one source key
pub struct RefreshController {
    source: String,
    ttl: chrono::Duration,
    provider: Arc<dyn SourceProvider>,
    cache: CacheStore,
    fallback: FallbackPolicy,
    fetch_timeout: Duration,
    retry: RetryPolicy,
    /// Number of refreshes completed so far
    completed: AtomicU64,
    /// Held for the duration of a refresh; keeps the last refresh's result
    in_flight: Mutex<Option<CountReading>>,
}

impl std::fmt::Debug for RefreshController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshController")
            .field("source", &self.source)
            .field("provider", &self.provider.kind())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RefreshController {
    /// Creates a controller with default TTL, timeout and retry policy
    pub fn new(
        source: impl Into<String>,
        provider: Arc<dyn SourceProvider>,
        cache: CacheStore,
        fallback: FallbackPolicy,
    ) -> Self {
        Self {
            source: source.into(),
            ttl: chrono::Duration::seconds(DEFAULT_TTL_SECS),
            provider,
            cache,
            fallback,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            retry: RetryPolicy::default(),
            completed: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Cache-first read
    ///
    /// Returns a fresh cached entry without touching the provider. Otherwise
    /// refreshes, joining an in-flight refresh if there is one.
    pub async fn get_count(&self) -> CountReading {
        if let Some(entry) = self.load() {
            if is_fresh(&entry, self.ttl, Utc::now()) {
                debug!(source = %self.source, count = entry.count, "Serving cached count");
                return CountReading::new(&self.source, &entry, ReadingOrigin::Cache);
            }
        }
        self.refresh(false).await
    }

    /// Refresh that ignores cache freshness
    ///
    /// Always results in at least one fetch attempt: either its own, or that
    /// of a refresh already in flight, which it joins rather than restarts.
    /// The stored entry is kept so the fallback chain can still use it.
    pub async fn force_refresh(&self) -> CountReading {
        self.refresh(true).await
    }

    /// Stores an operator-supplied count
    ///
    /// Waits for any in-flight refresh, so a fetch failing concurrently can
    /// never replace the override with its fallback value.
    pub async fn set_manual_override(&self, count: u64) -> Result<CountReading, CacheError> {
        let _guard = self.in_flight.lock().await;
        let entry = CacheEntry::manual(count, Utc::now());
        self.cache.put(&self.source, &entry)?;
        info!(source = %self.source, count, "Manual override stored");
        Ok(CountReading::new(&self.source, &entry, ReadingOrigin::Manual))
    }

    /// Stored entry, if any, without evaluating TTL
    pub fn cached(&self) -> Result<Option<CacheEntry>, CacheError> {
        self.cache.get(&self.source)
    }

    /// Drops the stored entry so the next read must refresh
    pub async fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.in_flight.lock().await;
        self.cache.clear(&self.source)
    }

    async fn refresh(&self, forced: bool) -> CountReading {
        let seen = self.completed.load(Ordering::Acquire);
        let mut last = self.in_flight.lock().await;

        if self.completed.load(Ordering::Acquire) != seen {
            if let Some(reading) = last.as_ref() {
                debug!(source = %self.source, forced, "Joined in-flight refresh");
                return reading.clone();
            }
        }

        if !forced {
            // Another caller may have refreshed between our cache check and the lock
            if let Some(entry) = self.load() {
                if is_fresh(&entry, self.ttl, Utc::now()) {
                    return CountReading::new(&self.source, &entry, ReadingOrigin::Cache);
                }
            }
        }

        let reading = self.run_refresh().await;
        *last = Some(reading.clone());
        self.completed.fetch_add(1, Ordering::Release);
        reading
    }

    async fn run_refresh(&self) -> CountReading {
        let previous = self.load();

        match self.fetch_with_retry().await {
            Ok(count) => {
                match previous.as_ref() {
                    Some(prev) => info!(
                        source = %self.source,
                        count,
                        previous = prev.count,
                        delta = %count_change(count, prev.count),
                        "Fetched count"
                    ),
                    None => info!(source = %self.source, count, "Fetched initial count"),
                }
                let entry = CacheEntry::fetched(count, Utc::now());
                self.store(&entry);
                CountReading::new(&self.source, &entry, ReadingOrigin::Fetch)
            }
            Err(err) => {
                // Re-read: the entry may have changed while the fetch ran
                let stored = self.load().or(previous);
                let resolution = self.fallback.resolve(stored.as_ref(), Utc::now());
                warn!(
                    source = %self.source,
                    provider = self.provider.kind(),
                    reason = err.reason(),
                    error = %err,
                    fallback = %resolution.kind,
                    count = resolution.entry.count,
                    "Fetch failed, using fallback"
                );
                self.store(&resolution.entry);
                CountReading::new(
                    &self.source,
                    &resolution.entry,
                    ReadingOrigin::Fallback(resolution.kind),
                )
            }
        }
    }

    async fn fetch_with_retry(&self) -> Result<u64, FetchError> {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.fetch_timeout, self.provider.fetch()).await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
            };

            match result {
                Ok(count) => return Ok(count),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff * attempt;
                    debug!(
                        source = %self.source,
                        attempt,
                        reason = err.reason(),
                        ?delay,
                        "Fetch attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Reads the stored entry; a failed read degrades to "no entry"
    fn load(&self) -> Option<CacheEntry> {
        match self.cache.get(&self.source) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(source = %self.source, error = %e, "Cache read failed");
                None
            }
        }
    }

    /// Persists an entry; a failed write is logged and otherwise ignored
    fn store(&self, entry: &CacheEntry) {
        if let Err(e) = self.cache.put(&self.source, entry) {
            warn!(source = %self.source, error = %e, "Cache write failed, value not remembered");
        }
    }
}

/// Signed difference between two counts, e.g. `+120` or `-3`
fn count_change(count: u64, previous: u64) -> String {
    if count >= previous {
        format!("+{}", count - previous)
    } else {
        format!("-{}", previous - count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::sources::FixedProvider;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Provider that fails with a given error and counts attempts
    struct FailingProvider {
        calls: AtomicUsize,
        transient: bool,
    }

    #[async_trait]
    impl SourceProvider for FailingProvider {
        fn kind(&self) -> &'static str {
            "failing"
        }

        async fn fetch(&self) -> Result<u64, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.transient {
                Err(FetchError::Http(503))
            } else {
                Err(FetchError::RateLimited)
            }
        }
    }

    /// Provider that never answers in time
    struct HangingProvider;

    #[async_trait]
    impl SourceProvider for HangingProvider {
        fn kind(&self) -> &'static str {
            "hanging"
        }

        async fn fetch(&self) -> Result<u64, FetchError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        }
    }

    fn memory_cache() -> CacheStore {
        CacheStore::new(Arc::new(MemoryStorage::new()))
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            backoff_ms: 250,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_up_to_limit() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicUsize::new(0),
            transient: true,
        });
        let controller = RefreshController::new(
            "youtube",
            provider.clone(),
            memory_cache(),
            FallbackPolicy::standard(5),
        )
        .with_retry(fast_retry(3));

        let reading = controller.get_count().await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(reading.count, 5);
        assert_eq!(
            reading.origin,
            ReadingOrigin::Fallback(FallbackKind::HardcodedConstant)
        );
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicUsize::new(0),
            transient: false,
        });
        let controller = RefreshController::new(
            "spotify",
            provider.clone(),
            memory_cache(),
            FallbackPolicy::standard(5),
        )
        .with_retry(fast_retry(3));

        controller.get_count().await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_becomes_fallback() {
        let controller = RefreshController::new(
            "spotify",
            Arc::new(HangingProvider),
            memory_cache(),
            FallbackPolicy::standard(1_350_186),
        )
        .with_fetch_timeout(Duration::from_millis(20))
        .with_retry(fast_retry(1));

        let reading = controller.get_count().await;

        assert_eq!(reading.count, 1_350_186);
        assert!(reading.is_estimate);
    }

    #[tokio::test]
    async fn test_fallback_value_restarts_freshness_clock() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicUsize::new(0),
            transient: false,
        });
        let controller = RefreshController::new(
            "spotify",
            provider.clone(),
            memory_cache(),
            FallbackPolicy::standard(7),
        );

        controller.get_count().await;
        let second = controller.get_count().await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.origin, ReadingOrigin::Cache);
        assert!(second.is_estimate);
    }

    #[tokio::test]
    async fn test_clear_forces_next_read_to_fetch() {
        let cache = memory_cache();
        let controller = RefreshController::new(
            "youtube",
            Arc::new(FixedProvider::new(10)),
            cache.clone(),
            FallbackPolicy::standard(1),
        );
        controller.get_count().await;

        controller.clear().await.unwrap();

        assert!(cache.get("youtube").unwrap().is_none());
        assert_eq!(controller.get_count().await.origin, ReadingOrigin::Fetch);
    }

    #[test]
    fn test_count_change_covers_full_u64_range() {
        assert_eq!(count_change(10, 7), "+3");
        assert_eq!(count_change(7, 10), "-3");
        assert_eq!(count_change(5, 5), "+0");
        assert_eq!(count_change(1, 1 << 63), "-9223372036854775807");
        assert_eq!(count_change(u64::MAX, 0), "+18446744073709551615");
    }

    #[tokio::test]
    async fn test_refresh_over_huge_stored_count_with_logging_enabled() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let cache = memory_cache();
        cache
            .put(
                "spotify",
                &CacheEntry::manual(1 << 63, Utc::now() - chrono::Duration::hours(5)),
            )
            .unwrap();
        let controller = RefreshController::new(
            "spotify",
            Arc::new(FixedProvider::new(1)),
            cache.clone(),
            FallbackPolicy::standard(5),
        );

        let reading = controller.get_count().await;

        assert_eq!(reading.count, 1);
        assert_eq!(reading.origin, ReadingOrigin::Fetch);
        assert_eq!(cache.get("spotify").unwrap().unwrap().count, 1);
    }
}
