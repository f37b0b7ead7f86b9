//! Integration tests for the playcount binary
//!
//! Every run points at a temp config using `fixed` providers, so nothing
//! here touches the network.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Writes a config with two fixed sources and a cache dir inside `dir`
fn write_config(dir: &Path) -> PathBuf {
    let config = format!(
        r#"
cache_dir = "{}"

[[sources]]
id = "spotify"
ttl_seconds = 3600
hardcoded_fallback = 1350186
provider = {{ kind = "fixed", count = 1405124 }}

[[sources]]
id = "youtube"
ttl_seconds = 300
hardcoded_fallback = 1420000
provider = {{ kind = "fixed", count = 1420000 }}
"#,
        dir.join("cache").display().to_string().replace('\\', "/")
    );
    let path = dir.join("config.toml");
    std::fs::write(&path, config).expect("Failed to write config");
    path
}

/// Helper to run the CLI with given args and capture output
fn run_cli(config: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_playcount"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute playcount")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = Command::new(env!("CARGO_BIN_EXE_playcount"))
        .arg("--help")
        .output()
        .expect("Failed to execute playcount");
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("playcount"));
    assert!(stdout.contains("refresh"));
    assert!(stdout.contains("set"));
}

#[test]
fn test_total_json_sums_sources() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = write_config(temp_dir.path());

    let output = run_cli(&config, &["--json", "total"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let result: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(result["total"], 2_825_124);
    assert_eq!(result["sources"][0]["source"], "spotify");
    assert_eq!(result["sources"][0]["count"], 1_405_124);
}

#[test]
fn test_total_writes_static_snapshot() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = write_config(temp_dir.path());
    let snapshot = temp_dir.path().join("static-counts.json");

    let output = run_cli(&config, &["total", "--output", snapshot.to_str().unwrap()]);

    assert!(output.status.success());
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&snapshot).unwrap()).unwrap();
    assert_eq!(doc["youtube"], 1_420_000);
    assert_eq!(doc["total"], 2_825_124);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2,825,124"));
}

#[test]
fn test_manual_override_is_used_by_total() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = write_config(temp_dir.path());

    let set = run_cli(&config, &["set", "spotify", "1 500 000"]);
    assert!(set.status.success(), "{}", String::from_utf8_lossy(&set.stderr));

    let output = run_cli(&config, &["--json", "total"]);
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["sources"][0]["count"], 1_500_000);
    assert_eq!(result["sources"][0]["is_manual_override"], true);
    assert_eq!(result["total"], 2_920_000);
}

#[test]
fn test_show_and_clear() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = write_config(temp_dir.path());
    run_cli(&config, &["refresh", "youtube"]);

    let shown = run_cli(&config, &["show", "--json"]);
    let rows: serde_json::Value = serde_json::from_slice(&shown.stdout).unwrap();
    assert!(rows[0]["entry"].is_null());
    assert_eq!(rows[1]["entry"]["count"], 1_420_000);
    assert_eq!(rows[1]["is_fresh"], true);

    let cleared = run_cli(&config, &["clear", "youtube"]);
    assert!(cleared.status.success());
    let shown = run_cli(&config, &["show", "--json"]);
    let rows: serde_json::Value = serde_json::from_slice(&shown.stdout).unwrap();
    assert!(rows[1]["entry"].is_null());
}

#[test]
fn test_clear_json_reports_cleared_source() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = write_config(temp_dir.path());
    run_cli(&config, &["refresh", "spotify"]);

    let cleared = run_cli(&config, &["--json", "clear", "spotify"]);

    assert!(cleared.status.success(), "{}", String::from_utf8_lossy(&cleared.stderr));
    let doc: serde_json::Value =
        serde_json::from_slice(&cleared.stdout).expect("stdout should be JSON");
    assert_eq!(doc["cleared"], "spotify");
    let shown = run_cli(&config, &["show", "--json"]);
    let rows: serde_json::Value = serde_json::from_slice(&shown.stdout).unwrap();
    assert!(rows[0]["entry"].is_null());
}

#[test]
fn test_negative_override_prints_error_and_exits() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = write_config(temp_dir.path());

    let output = run_cli(&config, &["set", "spotify", "-100"]);

    assert!(!output.status.success(), "Expected negative count to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("negative"), "stderr: {}", stderr);

    let shown = run_cli(&config, &["show", "--json"]);
    let rows: serde_json::Value = serde_json::from_slice(&shown.stdout).unwrap();
    assert!(rows[0]["entry"].is_null(), "rejected count must not be stored");
}

#[test]
fn test_unknown_source_fails() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config = write_config(temp_dir.path());

    let output = run_cli(&config, &["refresh", "tiktok"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown source"));
}

#[test]
fn test_missing_config_file_fails() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");

    let output = run_cli(&temp_dir.path().join("nope.toml"), &["total"]);

    assert!(!output.status.success());
}

#[test]
fn test_config_without_hardcoded_fallback_is_rejected_at_startup() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[[sources]]
id = "spotify"
ttl_seconds = 60
provider = { kind = "fixed", count = 1 }
"#,
    )
    .unwrap();

    let output = run_cli(&path, &["total"]);

    assert!(!output.status.success());
}
