//! Command-line interface parsing for playcount
//!
//! This module handles parsing of CLI arguments using clap, plus the small
//! formatting helpers the binary uses to print results.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::aggregate::{parse_override_count, AggregateResult, ValidationError};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The manual override count is not a valid non-negative integer
    #[error("Invalid count: {0}")]
    InvalidCount(#[from] ValidationError),
}

/// playcount - Total plays across rate-limited sources
#[derive(Parser, Debug)]
#[command(name = "playcount")]
#[command(about = "Total play count across sources, cached with fallbacks")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to the XDG config directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the total, using cached counts while they are fresh
    Total {
        /// Also write a static JSON snapshot to this file
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Fetch again, ignoring cache freshness
    Refresh {
        /// Only refresh this source
        source: Option<String>,
    },
    /// Set a manual override for a source
    ///
    /// Examples:
    ///   playcount set spotify 1405124
    ///   playcount set spotify "1 405 124"
    Set {
        source: String,
        #[arg(value_parser = parse_count_arg, allow_hyphen_values = true)]
        count: u64,
    },
    /// Show what is cached for each source without fetching
    Show,
    /// Forget the cached count for a source
    Clear { source: String },
}

impl Default for Command {
    fn default() -> Self {
        Command::Total { output: None }
    }
}

impl Cli {
    /// The requested command, `total` when none was given
    pub fn command_or_default(&self) -> Command {
        self.command.clone().unwrap_or_default()
    }
}

/// Parses a count argument for `set`
///
/// # Returns
/// * `Ok(u64)` for digits, optionally grouped with spaces, commas or dots
/// * `Err(CliError::InvalidCount)` for empty, negative or non-numeric input
pub fn parse_count_arg(s: &str) -> Result<u64, CliError> {
    Ok(parse_override_count(s)?)
}

/// Formats a count with comma thousands separators
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Flat `{source: count, ..., total, lastUpdated}` document for static pages
pub fn static_counts_json(result: &AggregateResult) -> Value {
    let mut doc = Map::new();
    for reading in &result.sources {
        doc.insert(reading.source.clone(), json!(reading.count));
    }
    doc.insert("total".to_string(), json!(result.total));
    doc.insert(
        "lastUpdated".to_string(),
        json!(result.computed_at.to_rfc3339()),
    );
    Value::Object(doc)
}
