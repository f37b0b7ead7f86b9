//! playcount - Total plays across rate-limited count sources
//!
//! Reads each source's count through a TTL cache with fallbacks, and prints
//! the per-source counts and their total.

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use playcount::aggregate::{AggregateResult, Aggregator, SnapshotRow};
use playcount::cli::{format_count, static_counts_json, Cli, Command};
use playcount::config::Config;
use playcount::refresh::CountReading;

/// Installs the stderr log subscriber; `RUST_LOG` wins over `--log-level`
fn init_logging(level: &str) {
    let fallback = format!("playcount={}", level);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn reading_line(reading: &CountReading) -> String {
    let mut line = format!("{:<10} {:>14}", reading.source, format_count(reading.count));
    if reading.is_manual_override {
        line.push_str("  (manual)");
    } else if reading.is_estimate {
        line.push_str("  (estimate)");
    }
    line
}

fn render_total(result: &AggregateResult) {
    for reading in &result.sources {
        println!("{}", reading_line(reading));
    }
    println!("{:<10} {:>14}", "total", format_count(result.total));
}

fn render_snapshot(rows: &[SnapshotRow]) {
    for row in rows {
        match (&row.entry, &row.error) {
            (_, Some(error)) => println!("{:<10} unreadable: {}", row.source, error),
            (None, None) => println!("{:<10} no cached count", row.source),
            (Some(entry), None) => {
                let mut notes = vec![if row.is_fresh { "fresh" } else { "stale" }];
                if entry.is_manual_override {
                    notes.push("manual");
                }
                if entry.is_estimate {
                    notes.push("estimate");
                }
                println!(
                    "{:<10} {:>14}  observed {}  ({})",
                    row.source,
                    format_count(entry.count),
                    entry.observed_at.to_rfc3339(),
                    notes.join(", ")
                );
            }
        }
    }
}

fn emit_total(result: &AggregateResult, json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        print_json(result)
    } else {
        render_total(result);
        Ok(())
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = Config::load(cli.config.as_deref())?;
    let cache = config.cache_store()?;
    let aggregator = Aggregator::from_config(&config, cache)?;

    match cli.command_or_default() {
        Command::Total { output } => {
            let result = aggregator.get_total().await;
            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&static_counts_json(&result))?)?;
                tracing::info!(path = %path.display(), total = result.total, "Wrote static counts");
            }
            emit_total(&result, cli.json)?;
        }
        Command::Refresh { source: None } => {
            let result = aggregator.force_refresh_all().await;
            emit_total(&result, cli.json)?;
        }
        Command::Refresh {
            source: Some(source),
        } => {
            let reading = aggregator.force_refresh(&source).await?;
            if cli.json {
                print_json(&reading)?;
            } else {
                println!("{}", reading_line(&reading));
            }
        }
        Command::Set { source, count } => {
            let reading = aggregator.set_manual_override(&source, count).await?;
            if cli.json {
                print_json(&reading)?;
            } else {
                println!("{}", reading_line(&reading));
            }
        }
        Command::Show => {
            let rows = aggregator.snapshot();
            if cli.json {
                print_json(&rows)?;
            } else {
                render_snapshot(&rows);
            }
        }
        Command::Clear { source } => {
            aggregator.clear(&source).await?;
            if cli.json {
                print_json(&serde_json::json!({ "cleared": source }))?;
            } else {
                println!("Cleared cached count for {}", source);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "playcount failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
