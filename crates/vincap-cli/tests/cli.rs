// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Integration tests for the vincap CLI
//!
//! These tests run the built binary with assert_cmd. Tests that need a
//! capture device are ignored by default and run serially on a board.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::{env, fs, path::PathBuf, thread, time::Duration};

/// Small delay to let the driver release buffers between hardware tests.
fn hardware_cleanup_delay() {
    thread::sleep(Duration::from_millis(500));
}

/// Helper to create a Command for the vincap binary
/// Uses VINCAP_BIN environment variable if set, otherwise the cargo-built binary
fn vincap_cmd() -> Command {
    match env::var("VINCAP_BIN") {
        Ok(bin_path) => Command::new(bin_path),
        Err(_) => Command::cargo_bin("vincap").expect("vincap binary not built"),
    }
}

/// Capture device for hardware tests, VINCAP_DEVICE or /dev/video0
fn capture_device() -> String {
    env::var("VINCAP_DEVICE").unwrap_or_else(|_| "/dev/video0".to_string())
}

/// Get the test data directory (target/testdata/vincap-cli)
fn get_test_data_dir() -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("target")
        .join("testdata")
        .join("vincap-cli");

    fs::create_dir_all(&test_dir).expect("Failed to create test data directory");
    test_dir
}

// =============================================================================
// Basic CLI Tests (No Hardware Required)
// =============================================================================

#[test]
fn test_cli_help() {
    vincap_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("V4L2 capture"))
        .stdout(predicate::str::contains("capture"))
        .stdout(predicate::str::contains("firmware"))
        .stdout(predicate::str::contains("sizes"));
}

#[test]
fn test_cli_version() {
    vincap_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vincap"));
}

#[test]
fn test_capture_help() {
    vincap_cmd()
        .args(["capture", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--device"))
        .stdout(predicate::str::contains("--method"))
        .stdout(predicate::str::contains("--distype"))
        .stdout(predicate::str::contains("--interval"))
        .stdout(predicate::str::contains("--continuous"));
}

#[test]
fn test_firmware_requires_name() {
    vincap_cmd()
        .arg("firmware")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("<NAME>"));
}

// =============================================================================
// Argument Validation
// =============================================================================

#[test]
fn test_capture_method_out_of_range() {
    vincap_cmd()
        .args(["capture", "--method", "4"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_capture_format_out_of_range() {
    vincap_cmd()
        .args(["capture", "-f", "11"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_capture_display_out_of_range() {
    vincap_cmd()
        .args(["capture", "-t", "3"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_capture_bad_crop() {
    vincap_cmd()
        .args(["capture", "--crop", "10,10,5,5"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("crop"));
}

#[test]
fn test_dmabuf_requires_drm() {
    vincap_cmd()
        .args(["capture", "-d", "/nonexistent/video99", "-m", "2", "-t", "1"])
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("DRM"));
}

#[test]
fn test_userptr_rejects_drm() {
    vincap_cmd()
        .args(["capture", "-d", "/nonexistent/video99", "-m", "1", "-t", "2"])
        .assert()
        .failure()
        .code(4);
}

#[test]
fn test_firmware_name_too_long() {
    vincap_cmd()
        .args(["firmware", &"x".repeat(40), "-d", "/dev/null"])
        .assert()
        .failure()
        .code(4);
}

// =============================================================================
// Missing or Wrong Devices
// =============================================================================

#[test]
fn test_capture_missing_device() {
    vincap_cmd()
        .args(["capture", "-d", "/nonexistent/video99"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Device not found"));
}

#[test]
fn test_capture_not_a_device() {
    let file = get_test_data_dir().join("not-a-device");
    fs::write(&file, b"plain file").unwrap();

    vincap_cmd()
        .args(["capture", "-d"])
        .arg(&file)
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("not a capture device"));
}

#[test]
fn test_capture_non_v4l2_device() {
    vincap_cmd()
        .args(["capture", "-d", "/dev/null"])
        .assert()
        .failure()
        .code(4);
}

#[test]
fn test_sizes_missing_device() {
    vincap_cmd()
        .args(["sizes", "-d", "/nonexistent/video99"])
        .assert()
        .failure()
        .code(3);
}

// =============================================================================
// Hardware Tests
// =============================================================================

#[test]
#[ignore = "requires a V4L2 capture device"]
#[serial]
fn test_capture_three_frames_json() {
    let output = vincap_cmd()
        .args(["capture", "-d", &capture_device(), "-m", "0", "--json"])
        .timeout(Duration::from_secs(30))
        .output()
        .unwrap();
    assert!(output.status.success(), "{:?}", output);

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["frames_captured"], 3);

    hardware_cleanup_delay();
}

#[test]
#[ignore = "requires a V4L2 capture device"]
#[serial]
fn test_capture_record_output() {
    let out = get_test_data_dir().join("capture.yuv");
    let _ = fs::remove_file(&out);

    vincap_cmd()
        .args(["capture", "-d", &capture_device(), "-m", "1", "-n", "5"])
        .arg("--output")
        .arg(&out)
        .timeout(Duration::from_secs(30))
        .assert()
        .success();

    let size = fs::metadata(&out).unwrap().len();
    assert!(size > 0);
    assert_eq!(size % 5, 0);

    hardware_cleanup_delay();
}

#[test]
#[ignore = "requires a V4L2 capture device"]
#[serial]
fn test_capture_read_io_metrics() {
    vincap_cmd()
        .args(["capture", "-d", &capture_device(), "-m", "3", "--metrics"])
        .timeout(Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("Capture Metrics"))
        .stdout(predicate::str::contains("Frames captured:   3"));

    hardware_cleanup_delay();
}
