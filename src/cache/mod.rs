//! Cache module for persisting per-source counts to disk
//!
//! This module provides a cache store that persists one entry per source key
//! to the filesystem. TTL is not evaluated on read: expired entries are still
//! returned so the fallback chain can reuse them, and freshness is decided by
//! the caller with [`is_fresh`].

mod manager;
mod storage;

pub use manager::{is_fresh, CacheEntry, CacheError, CacheStore};
pub use storage::{FileStorage, MemoryStorage, Storage};
