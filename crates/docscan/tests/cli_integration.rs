//! Integration tests for the `docscan-cli` binary.
//!
//! These tests exercise the CLI binary via `assert_cmd`: help/version,
//! the model table, sense lookups, config display and full simulated scans.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn cli() -> assert_cmd::Command {
    cargo_bin_cmd!("docscan-cli")
}

fn write_job(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("job.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn cli_help_succeeds() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("docscan-cli"));
}

#[test]
fn cli_version_prints_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

// ── models ──

#[test]
fn cli_models_lists_every_family() {
    cli()
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("COPISCAN II 6338"))
        .stdout(predicate::str::contains("KV-SS25"))
        .stdout(predicate::str::contains("JX-610"));
}

#[test]
fn cli_models_json_is_an_array() {
    let output = cli()
        .args(["--json", "models"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let models = json.as_array().unwrap();
    assert_eq!(models.len(), 7);
    assert!(models.iter().all(|m| m["name"].is_string()));
}

// ── sense ──

#[test]
fn cli_sense_translates_jam() {
    cli()
        .args(["sense", "KV-SS25", "0x03", "0x80", "0x00"])
        .assert()
        .success()
        .stdout(predicate::str::contains("jammed"));
}

#[test]
fn cli_sense_json_reports_terminal_flag() {
    let output = cli()
        .args(["--json", "sense", "COPISCAN II 6338", "0B", "80", "02"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["outcome"], "CodeNotFound");
    assert_eq!(json["terminal"], false);
}

#[test]
fn cli_sense_rejects_unknown_model() {
    cli()
        .args(["sense", "ScanMaster 9000", "0", "0", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown model"));
}

#[test]
fn cli_sense_rejects_bad_byte() {
    cli()
        .args(["sense", "JX-250", "0x100", "0", "0"])
        .assert()
        .failure();
}

// ── config ──

#[test]
fn cli_config_json_produces_valid_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "buffers = 6\nmode = \"inline\"\n").unwrap();

    let output = cli()
        .args(["--json", "--config"])
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["settings"]["buffers"], 6);
    assert_eq!(json["settings"]["mode"], "inline");
    assert_eq!(json["config_file_exists"], true);
}

#[test]
fn cli_config_rejects_invalid_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "buffers = 1\n").unwrap();
    cli()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("buffers"));
}

#[test]
fn cli_config_save_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    cli()
        .arg("--config")
        .arg(&path)
        .args(["config", "--save"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(loaded)"));
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("# docscan"));
    assert!(text.contains("mode = \"auto\""));
}

#[test]
fn cli_verbose_flag_accepted() {
    let dir = tempfile::tempdir().unwrap();
    cli()
        .args(["-v", "--config"])
        .arg(dir.path().join("none.toml"))
        .arg("config")
        .assert()
        .success();
}

// ── simulate ──

#[test]
fn cli_simulate_writes_items() {
    let dir = tempfile::tempdir().unwrap();
    let job = write_job(
        &dir,
        "pixels_per_line = 1728\nlines = 10\nduplex = true\npatchcodes = true\n",
    );
    let out = dir.path().join("out");

    cli()
        .args(["simulate", "--job"])
        .arg(&job)
        .arg("--out-dir")
        .arg(&out)
        .arg("--config")
        .arg(dir.path().join("none.toml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("front page"))
        .stdout(predicate::str::contains("back page"));

    assert_eq!(
        std::fs::read(out.join("00-front-page.raw")).unwrap().len(),
        2160
    );
    let xml = std::fs::read_to_string(out.join("02-transmit-bar-patch-codes.xml")).unwrap();
    assert!(xml.contains("<type>patchcode</type>"));
}

#[test]
fn cli_simulate_json_overlapped() {
    let dir = tempfile::tempdir().unwrap();
    let job = write_job(
        &dir,
        "mode = \"color\"\ndepth = 8\npixels_per_line = 100\nlines = 50\n",
    );

    let output = cli()
        .args(["--json", "simulate", "--model", "JX-250", "--chunk", "999", "--job"])
        .arg(&job)
        .arg("--config")
        .arg(dir.path().join("none.toml"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["model"], "JX-250");
    assert_eq!(json["items"][0]["bytes"], 100 * 3 * 50);
    assert_eq!(json["items"][0]["shape"]["format"], "rgb");
}

#[test]
fn cli_simulate_rejects_unsupported_job() {
    let dir = tempfile::tempdir().unwrap();
    let job = write_job(&dir, "pixels_per_line = 1728\nduplex = true\n");
    cli()
        .args(["simulate", "--model", "JX-610", "--job"])
        .arg(&job)
        .arg("--config")
        .arg(dir.path().join("none.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid argument"));
}

#[test]
fn cli_simulate_missing_job_file_fails() {
    cli()
        .args(["simulate", "--job", "/nonexistent/job.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}
