//! playcount library
//!
//! Aggregates counts from unreliable, rate-limited sources. Each source is
//! read through a TTL cache, refreshed at most once at a time, and backed by
//! a fallback chain so that a count is always available.

pub mod aggregate;
pub mod cache;
pub mod cli;
pub mod config;
pub mod fallback;
pub mod refresh;
pub mod sources;
