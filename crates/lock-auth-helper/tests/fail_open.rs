//! Startup failures dismiss the caller's dialog and exit non-zero.

use std::io::Write;
use std::process::{Command, Output, Stdio};

use tempfile::NamedTempFile;

fn run_helper(config: &NamedTempFile) -> Output {
    let child = Command::new(env!("CARGO_BIN_EXE_lock-auth-helper"))
        .arg("--config")
        .arg(config.path())
        .env_remove("JOURNAL_STREAM")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.wait_with_output().unwrap()
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", contents).unwrap();
    file
}

#[test]
fn invalid_config_fails_open() {
    let config = config_file("[auth]\nmax_failures = 0");
    let output = run_helper(&config);

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "CS_PAM_AUTH_SUCCESS\n");
}

// Built with --no-default-features
#[cfg(not(feature = "pam"))]
#[test]
fn build_without_locking_support_fails_open() {
    let config = config_file(
        "[pam]\nconfig_dir = \"/nonexistent/pam.d\"\nconfig_file = \"/nonexistent/pam.conf\"",
    );
    let output = run_helper(&config);

    assert_eq!(output.status.code(), Some(1));
    // A single line and no prompt
    assert_eq!(String::from_utf8_lossy(&output.stdout), "CS_PAM_AUTH_SUCCESS\n");
}

#[test]
fn unknown_option_is_a_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_lock-auth-helper"))
        .arg("--no-such-option")
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
}
