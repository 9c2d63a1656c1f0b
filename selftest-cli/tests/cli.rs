//! End-to-end tests of the `selftest` binary against the simulated platform.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

/// A temp dir with an empty config so the user's own config is never read.
fn workspace() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let config = dir.path().join("selftest.toml");
    std::fs::write(&config, "").unwrap();
    (dir, config)
}

fn selftest(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("selftest").unwrap();
    cmd.env_remove("SELFTEST_API_KEY")
        .env("RUST_LOG", "error")
        .arg("--config")
        .arg(config);
    cmd
}

// ============================================================================
// machine
// ============================================================================

/// A healthy simulated host passes.
#[test]
fn machine_passes_on_mock() {
    let (_dir, config) = workspace();

    selftest(&config)
        .args(["--mock", "machine", "54321"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Host 54321"))
        .stdout(predicate::str::contains("Result: PASS"));
}

/// Raw mode prints the report as JSON.
#[test]
fn machine_raw_prints_json() {
    let (_dir, config) = workspace();

    let output = selftest(&config)
        .args(["--mock", "--raw", "machine", "7"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["host_id"], 7);
    assert_eq!(report["verdict"], "Pass");
}

/// A failed host makes `machine` exit with status 1, report still printed.
#[test]
fn machine_with_unmet_requirement_exits_one() {
    let (_dir, config) = workspace();
    std::fs::write(&config, "[requirements]\nmin_driver_version = \"999.0\"\n").unwrap();

    selftest(&config)
        .args(["--mock", "machine", "54321"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("min_driver_version"))
        .stdout(predicate::str::contains("Result: FAIL"));
}

/// The real platform needs an API key.
#[test]
fn missing_api_key_is_an_error() {
    let (_dir, config) = workspace();

    selftest(&config)
        .args(["machine", "54321"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No API key"));
}

/// Bad host ids are rejected by argument parsing.
#[test]
fn invalid_host_id_is_rejected() {
    let (_dir, config) = workspace();

    selftest(&config)
        .args(["--mock", "machine", "not-a-host"])
        .assert()
        .failure();
}

// ============================================================================
// fleet
// ============================================================================

/// Every host lands in the passed file.
#[test]
fn fleet_writes_result_files() {
    let (dir, config) = workspace();
    let passed = dir.path().join("passed.log");
    let failed = dir.path().join("failed.log");

    selftest(&config)
        .args(["--mock", "fleet", "1", "2", "3"])
        .arg("--passed-file")
        .arg(&passed)
        .arg("--failed-file")
        .arg(&failed)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 selected, 3 passed, 0 failed"));

    assert_eq!(std::fs::read_to_string(&passed).unwrap(), "1\n2\n3\n");
    assert_eq!(std::fs::read_to_string(&failed).unwrap(), "");
}

/// Hosts failing requirements go to the failed file; exit code stays zero.
#[test]
fn fleet_failures_go_to_failed_file() {
    let (dir, config) = workspace();
    let failed = dir.path().join("failed.log");
    std::fs::write(
        &config,
        format!(
            "[requirements]\nmin_driver_version = \"999.0\"\n\n[fleet]\nfailed_file = {:?}\npassed_file = {:?}\n",
            failed,
            dir.path().join("passed.log"),
        ),
    )
    .unwrap();

    selftest(&config)
        .args(["--mock", "fleet", "10", "20"])
        .assert()
        .success()
        .stdout(predicate::str::contains("FAIL 10: RequirementFailure"));

    assert_eq!(std::fs::read_to_string(&failed).unwrap(), "10\n20\n");
}

/// Hosts can come from a file and be sampled with a seed.
#[test]
fn fleet_samples_hosts_file() {
    let (dir, config) = workspace();
    let hosts = dir.path().join("hosts.txt");
    let ids: Vec<String> = (1..=10).map(|i| i.to_string()).collect();
    std::fs::write(&hosts, ids.join("\n")).unwrap();
    let passed = dir.path().join("passed.log");

    selftest(&config)
        .args(["--mock", "fleet", "--sample-pct", "50", "--seed", "3"])
        .arg("--hosts-file")
        .arg(&hosts)
        .arg("--passed-file")
        .arg(&passed)
        .arg("--failed-file")
        .arg(dir.path().join("failed.log"))
        .assert()
        .success()
        .stdout(predicate::str::contains("5 selected"))
        .stdout(predicate::str::contains("(seed 3)"));

    assert_eq!(std::fs::read_to_string(&passed).unwrap().lines().count(), 5);
}

/// No hosts at all is a usage error.
#[test]
fn fleet_without_hosts_fails() {
    let (_dir, config) = workspace();

    selftest(&config)
        .args(["--mock", "fleet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No host ids given"));
}

/// Sample percentage must be in (0, 100].
#[test]
fn fleet_rejects_zero_sample() {
    let (_dir, config) = workspace();

    selftest(&config)
        .args(["--mock", "fleet", "1", "--sample-pct", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sample percentage"));
}

/// A broken config file stops the run before anything starts.
#[test]
fn broken_config_fails() {
    let (_dir, config) = workspace();
    std::fs::write(&config, "[fleet\n").unwrap();

    selftest(&config)
        .args(["--mock", "fleet", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
