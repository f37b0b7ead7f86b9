//! Cache store for per-source count entries
//!
//! Provides a `CacheStore` that serializes one [`CacheEntry`] per source key
//! to JSON on top of a [`Storage`] backend.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::storage::{FileStorage, Storage};

/// Last known value for one source, as persisted on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The count itself
    pub count: u64,
    /// When the value was obtained (not when it was read)
    pub observed_at: DateTime<Utc>,
    /// True if the value came from a fallback path rather than a successful fetch
    pub is_estimate: bool,
    /// True if an operator set this value explicitly
    pub is_manual_override: bool,
}

impl CacheEntry {
    /// Entry for a successful fetch
    pub fn fetched(count: u64, observed_at: DateTime<Utc>) -> Self {
        Self {
            count,
            observed_at,
            is_estimate: false,
            is_manual_override: false,
        }
    }

    /// Entry for an operator-supplied value
    pub fn manual(count: u64, observed_at: DateTime<Utc>) -> Self {
        Self {
            count,
            observed_at,
            is_estimate: false,
            is_manual_override: true,
        }
    }

    /// Entry for a degraded value produced by the fallback chain
    pub fn estimate(count: u64, observed_at: DateTime<Utc>) -> Self {
        Self {
            count,
            observed_at,
            is_estimate: true,
            is_manual_override: false,
        }
    }
}

/// Errors raised by the cache store
#[derive(Debug, Error)]
pub enum CacheError {
    /// The storage backend failed to read, write or remove
    #[error("cache I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The entry could not be serialized
    #[error("failed to encode cache entry for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The stored bytes are not a valid entry
    #[error("failed to decode cache entry for '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Returns whether `entry` can be served without a refresh
///
/// Fresh iff `now - observed_at < ttl`. An entry observed in the future
/// (clock skew) counts as fresh.
pub fn is_fresh(entry: &CacheEntry, ttl: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(entry.observed_at) < ttl
}

/// Owns all cache entries; reads and writes whole entries only
#[derive(Clone)]
pub struct CacheStore {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Creates a CacheStore over the given backend
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Creates a CacheStore backed by JSON files in `dir`
    pub fn with_dir(dir: impl Into<std::path::PathBuf>) -> Self {
        Self::new(Arc::new(FileStorage::with_dir(dir.into())))
    }

    /// Looks up the entry for `key` without evaluating TTL
    ///
    /// # Returns
    /// * `Ok(Some(entry))` if an entry is stored
    /// * `Ok(None)` if the key has never been written or was cleared
    /// * `Err(CacheError)` if the backend failed or the bytes are corrupt
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let bytes = self.storage.read(key).map_err(|source| CacheError::Io {
            key: key.to_string(),
            source,
        })?;

        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|source| CacheError::Decode {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Replaces the entry for `key`
    pub fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let json = serde_json::to_vec_pretty(entry).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;

        self.storage
            .write(key, &json)
            .map_err(|source| CacheError::Io {
                key: key.to_string(),
                source,
            })
    }

    /// Forgets the entry for `key`, forcing the next read to refresh
    pub fn clear(&self, key: &str) -> Result<(), CacheError> {
        self.storage.remove(key).map_err(|source| CacheError::Io {
            key: key.to_string(),
            source,
        })
    }
}
