//! CLI end-to-end tests
//!
//! Tests for the vidconvert command-line interface.

mod common;

use assert_cmd::prelude::*;
use common::{default_source, write_source, SourceShape};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the vidconvert binary
#[allow(deprecated)]
fn vidconvert_cmd() -> Command {
    Command::cargo_bin("vidconvert").unwrap()
}

/// Config that keeps the crash guard in memory so runs do not touch $HOME.
fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let path = dir.join("vidconvert.toml");
    fs::write(&path, format!("[state]\npersist = false\n{extra}")).unwrap();
    path
}

#[test]
fn test_cli_no_args_shows_help() {
    vidconvert_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    vidconvert_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("vidconvert"))
        .stdout(predicate::str::contains("convert"));
}

#[test]
fn test_cli_version_command() {
    vidconvert_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "vidconvert {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_cli_convert_help() {
    vidconvert_cmd()
        .args(["convert", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--start-ms"))
        .stdout(predicate::str::contains("--copy-video"));
}

#[test]
fn test_cli_validate_config() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "\n[platform]\napi_level = 19\nmanufacturer = \"samsung\"\n");

    vidconvert_cmd()
        .arg("validate")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("api 19"))
        .stdout(predicate::str::contains("in memory"));
}

#[test]
fn test_cli_validate_rejects_audio_encoder() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "\n[encoder]\nmime = \"audio/mp4a-latm\"\n");

    vidconvert_cmd()
        .arg("validate")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not a video type"));
}

#[test]
fn test_cli_validate_rejects_malformed_toml() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("broken.toml");
    fs::write(&config, "[platform\napi_level = ").unwrap();

    vidconvert_cmd().arg("validate").arg(&config).assert().failure();
}

#[test]
fn test_cli_probe_json() {
    let dir = tempdir().unwrap();
    let source = default_source(dir.path());

    vidconvert_cmd()
        .args(["probe", "--json"])
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"result_width\": 320"))
        .stdout(predicate::str::contains("\"has_audio\": true"));
}

#[test]
fn test_cli_probe_missing_file() {
    vidconvert_cmd()
        .args(["probe", "/nonexistent/clip.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_cli_plan_shows_geometry() {
    let dir = tempdir().unwrap();
    let source = default_source(dir.path());
    let config = write_config(dir.path(), "");

    vidconvert_cmd()
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .arg(&source)
        .args(["--width", "160", "--height", "120"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"width\": 160"))
        .stdout(predicate::str::contains("\"height\": 120"));
}

#[test]
fn test_cli_codecs_lists_loopback_encoder() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "");

    vidconvert_cmd()
        .arg("--config")
        .arg(&config)
        .arg("codecs")
        .assert()
        .success()
        .stdout(predicate::str::contains("OMX.vidconvert.loopback.avc.encoder"))
        .stdout(predicate::str::contains("Resolved profile"));
}

#[test]
fn test_cli_convert_with_trim() {
    let dir = tempdir().unwrap();
    let source = default_source(dir.path());
    let output = dir.path().join("trimmed.mp4");
    let config = write_config(dir.path(), "");

    vidconvert_cmd()
        .arg("--config")
        .arg(&config)
        .arg("convert")
        .arg(&source)
        .arg(&output)
        .args(["--start-ms", "1000", "--end-ms", "3000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Converted"));

    let samples = common::read_track(&output, "video/");
    assert_eq!(samples.len(), 50);
    assert!(samples.iter().all(|s| (1_000_000..3_000_000).contains(&s.tagged_pts())));
}

#[test]
fn test_cli_convert_default_output_path() {
    let dir = tempdir().unwrap();
    let source = default_source(dir.path());
    let config = write_config(dir.path(), "");

    vidconvert_cmd()
        .arg("--config")
        .arg(&config)
        .arg("convert")
        .arg(&source)
        .arg("--copy-video")
        .assert()
        .success();

    assert!(dir.path().join("source_converted.mp4").exists());
}

#[test]
fn test_cli_convert_refuses_source_without_audio() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("silent.mp4");
    write_source(
        &source,
        &SourceShape {
            with_audio: false,
            duration_us: 1_000_000,
            ..SourceShape::default()
        },
    );
    let config = write_config(dir.path(), "");

    vidconvert_cmd()
        .arg("--config")
        .arg(&config)
        .arg("convert")
        .arg(&source)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be converted"));
}

#[test]
fn test_cli_convert_missing_input() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "");

    vidconvert_cmd()
        .arg("--config")
        .arg(&config)
        .args(["convert", "/nonexistent/clip.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
