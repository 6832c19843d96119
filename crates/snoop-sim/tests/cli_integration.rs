//! Integration tests for the snoop-sim CLI.

use interconnect_core as _;
use rand as _;
use serde as _;
use snoop_sim as _;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use thiserror as _;
use tracing as _;
use tracing_subscriber as _;

fn binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_snoop-sim"))
}

#[test]
fn run_prints_text_summary() {
    let output = Command::new(binary_path())
        .arg("run")
        .output()
        .expect("failed to run snoop-sim");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Simulation finished at"));
    assert!(stdout.contains("100 steps"));
}

#[test]
fn run_writes_trace_log() {
    let temp_dir = tempfile::tempdir().unwrap();
    let log = temp_dir.path().join("snooping.log");

    let status = Command::new(binary_path())
        .args(["run", "--seed", "3", "--log", log.to_str().unwrap()])
        .status()
        .expect("failed to run snoop-sim");

    assert!(status.success());
    let text = fs::read_to_string(&log).unwrap();
    let steps = text
        .lines()
        .filter(|line| line.starts_with("caching_initiator executing instruction from cache"))
        .count();
    assert_eq!(steps, 100);
    assert!(text
        .lines()
        .any(|line| line.starts_with("caching_initiator armed write snoop on 100 to 17f")));
    assert!(text.lines().any(|line| line.starts_with("initiator completed regular")));
}

#[test]
fn identical_seeds_write_identical_logs() {
    let temp_dir = tempfile::tempdir().unwrap();
    let first = temp_dir.path().join("first.log");
    let second = temp_dir.path().join("second.log");

    for log in [&first, &second] {
        let status = Command::new(binary_path())
            .args(["run", "--seed", "21", "--log", log.to_str().unwrap()])
            .status()
            .expect("failed to run snoop-sim");
        assert!(status.success());
    }

    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn json_report_is_machine_readable() {
    let output = Command::new(binary_path())
        .args(["run", "--json", "--until-us", "2"])
        .output()
        .expect("failed to run snoop-sim");

    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["config"]["seed"], 0);
    assert_eq!(report["requests_in_use"], 0);
    assert!(report["tallies"]["cached_steps"].as_u64().unwrap() < 100);
}

#[test]
fn unknown_option_fails_with_usage() {
    let output = Command::new(binary_path())
        .args(["run", "--fast"])
        .output()
        .expect("failed to run snoop-sim");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown option: --fast"));
    assert!(stderr.contains("Usage: snoop-sim"));
}

#[test]
fn help_flag_prints_usage() {
    let output = Command::new(binary_path())
        .arg("--help")
        .output()
        .expect("failed to run snoop-sim");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage: snoop-sim"));
}
