#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output};

fn sortgate(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sortgate"))
        .args(["--log-level", "error"])
        .args(args)
        .env_remove("SORTGATE_PORT")
        .env_remove("SORTGATE_CLASSIFIER")
        .env_remove("SORTGATE_CATEGORIES")
        .env_remove("SORTGATE_THRESHOLD")
        .env_remove("SORTGATE_CLASSIFIER_TIMEOUT")
        .output()
        .expect("sortgate should run")
}

fn missing_port() -> String {
    format!("/dev/sortgate-cli-missing-{}", std::process::id())
}

#[test]
fn version_prints_package_version() {
    let output = sortgate(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("sortgate {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn extended_version_lists_defaults() {
    let output = sortgate(&["version", "--extended"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("default_baud: 115200"));
    assert!(stdout.contains("default_categories: plastic,paper,Aluminium"));
}

#[test]
fn help_lists_subcommands() {
    let output = sortgate(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["run", "capture", "actuate", "ports", "version"] {
        assert!(stdout.contains(name), "help should mention {name}");
    }
}

#[test]
fn capture_on_missing_port_is_transport_error() {
    let port = missing_port();
    let output = sortgate(&["capture", "--port", &port, "--settle", "0ms"]);
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("open failed"), "stderr: {stderr}");
    assert!(stderr.contains(&port), "stderr: {stderr}");
}

#[test]
fn actuate_rejects_unknown_category_before_opening_port() {
    let port = missing_port();
    let output = sortgate(&["actuate", "--port", &port, "glass"]);
    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown category"), "stderr: {stderr}");
}

#[test]
fn run_rejects_out_of_range_threshold() {
    let port = missing_port();
    let output = sortgate(&[
        "run",
        "--port",
        &port,
        "--classifier-cmd",
        "cat",
        "--threshold",
        "1.5",
    ]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn run_rejects_bad_duration() {
    let port = missing_port();
    let output = sortgate(&[
        "run",
        "--port",
        &port,
        "--classifier-cmd",
        "cat",
        "--header-timeout",
        "soon",
    ]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn run_on_missing_port_is_transport_error() {
    let port = missing_port();
    let output = sortgate(&["run", "--port", &port, "--classifier-cmd", "cat"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn categories_come_from_environment() {
    let port = missing_port();
    let output = Command::new(env!("CARGO_BIN_EXE_sortgate"))
        .args(["--log-level", "error", "actuate", "--port", &port, "glass"])
        .env("SORTGATE_CATEGORIES", "glass,metal")
        .output()
        .expect("sortgate should run");
    // The category is accepted, so the failure moves on to opening the port.
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn missing_port_argument_is_usage_error() {
    let output = sortgate(&["capture"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn run_rejects_zero_classifier_timeout() {
    let port = missing_port();
    let output = sortgate(&[
        "run",
        "--port",
        &port,
        "--classifier-cmd",
        "cat",
        "--classifier-timeout",
        "0s",
    ]);
    assert_eq!(output.status.code(), Some(64));
}
