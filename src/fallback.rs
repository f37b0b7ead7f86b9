//! Fallback chain for failed fetches
//!
//! When a source cannot be fetched, the policy walks an ordered chain of
//! degraded answers and produces the entry to cache in place of a fetched
//! value. The chain always ends in a hardcoded constant, so resolution
//! cannot fail at request time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheEntry;

/// One step of the fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackKind {
    /// Keep an operator-set value
    ManualOverride,
    /// Reuse the last cached value regardless of age
    CachedStale,
    /// Last-known-good constant from configuration
    HardcodedConstant,
}

impl fmt::Display for FallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FallbackKind::ManualOverride => "manual-override",
            FallbackKind::CachedStale => "cached-stale",
            FallbackKind::HardcodedConstant => "hardcoded-constant",
        };
        f.write_str(label)
    }
}

/// Reasons a configured chain is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    /// A failed fetch must never replace an operator's value
    #[error("fallback chain must start with manual-override")]
    ManualOverrideNotFirst,

    /// Without the constant, resolution could come up empty
    #[error("fallback chain must end with hardcoded-constant")]
    HardcodedConstantNotLast,

    #[error("fallback step '{0}' appears more than once")]
    Duplicate(FallbackKind),
}

/// Entry chosen by the chain and the step that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub entry: CacheEntry,
    pub kind: FallbackKind,
}

/// Static, per-source fallback configuration
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    chain: Vec<FallbackKind>,
    hardcoded: u64,
}

impl FallbackPolicy {
    /// Default order: manual override, stale cache, hardcoded constant
    pub fn standard(hardcoded: u64) -> Self {
        Self {
            chain: vec![
                FallbackKind::ManualOverride,
                FallbackKind::CachedStale,
                FallbackKind::HardcodedConstant,
            ],
            hardcoded,
        }
    }

    /// Builds a policy from a configured chain
    ///
    /// The only freedom a chain has is whether stale cache reuse is enabled;
    /// the manual override always comes first and the constant always last.
    pub fn new(chain: Vec<FallbackKind>, hardcoded: u64) -> Result<Self, ChainError> {
        for (i, kind) in chain.iter().enumerate() {
            if chain[..i].contains(kind) {
                return Err(ChainError::Duplicate(*kind));
            }
        }
        if chain.first() != Some(&FallbackKind::ManualOverride) {
            return Err(ChainError::ManualOverrideNotFirst);
        }
        if chain.last() != Some(&FallbackKind::HardcodedConstant) {
            return Err(ChainError::HardcodedConstantNotLast);
        }
        Ok(Self { chain, hardcoded })
    }

    pub fn chain(&self) -> &[FallbackKind] {
        &self.chain
    }

    pub fn hardcoded(&self) -> u64 {
        self.hardcoded
    }

    /// Picks the degraded value for a failed fetch
    ///
    /// `stored` is the entry currently in the cache, if any. The returned
    /// entry carries `observed_at = now` so the freshness clock restarts and
    /// the next TTL window is served without another fetch.
    pub fn resolve(&self, stored: Option<&CacheEntry>, now: DateTime<Utc>) -> Resolution {
        for kind in &self.chain {
            let entry = match (kind, stored) {
                (FallbackKind::ManualOverride, Some(e)) if e.is_manual_override => {
                    CacheEntry::manual(e.count, now)
                }
                (FallbackKind::CachedStale, Some(e)) => CacheEntry::estimate(e.count, now),
                (FallbackKind::HardcodedConstant, _) => CacheEntry::estimate(self.hardcoded, now),
                _ => continue,
            };
            return Resolution { entry, kind: *kind };
        }

        // Unreachable for validated chains, which always end in the constant
        Resolution {
            entry: CacheEntry::estimate(self.hardcoded, now),
            kind: FallbackKind::HardcodedConstant,
        }
    }
}
