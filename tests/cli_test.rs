//! CLI and shutdown integration tests.
//!
//! Tests:
//! - CLI help and version output
//! - Graceful shutdown on SIGTERM

use std::process::Command;
use std::time::Duration;

const BIN: &str = env!("CARGO_BIN_EXE_gradecast");

#[test]
fn test_cli_help_output() {
    let output = Command::new(BIN)
        .arg("--help")
        .output()
        .expect("failed to run");
    let stdout = String::from_utf8_lossy(&output.stdout);

    for option in [
        "--port",
        "--data-dir",
        "--log-level",
        "--log-format",
        "--poll-interval-ms",
        "--replay-history",
    ] {
        assert!(stdout.contains(option), "help should mention {option}");
    }
}

#[test]
fn test_cli_version_output() {
    let output = Command::new(BIN)
        .arg("--version")
        .output()
        .expect("failed to run");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "version output should contain version number: {}",
        stdout
    );
}

/// The server exits cleanly after SIGTERM and leaves its database behind.
#[cfg(unix)]
#[tokio::test]
async fn test_graceful_shutdown_on_sigterm() {
    use std::process::Stdio;
    use tokio::process::Command as TokioCommand;
    use tokio::time::timeout;

    let temp_dir = tempfile::TempDir::new().expect("failed to create temp dir");

    let mut child = TokioCommand::new(BIN)
        .args([
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--data-dir",
            temp_dir.path().to_str().unwrap(),
        ])
        .env_remove("OTEL_EXPORTER_OTLP_ENDPOINT")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn server");

    tokio::time::sleep(Duration::from_secs(1)).await;

    let pid = child.id().expect("no pid");
    let _ = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status();

    match timeout(Duration::from_secs(5), child.wait()).await {
        Ok(Ok(status)) => {
            assert!(status.success(), "server should exit cleanly: {status}");
        }
        Ok(Err(e)) => panic!("failed to wait for child: {}", e),
        Err(_) => {
            child.kill().await.expect("failed to kill");
            panic!("server did not respond to SIGTERM within timeout");
        }
    }

    assert!(temp_dir.path().join("gradecast.db").exists());
}
