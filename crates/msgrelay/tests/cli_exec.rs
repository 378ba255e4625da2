#![cfg(all(unix, feature = "cli"))]

use std::process::Command;

fn msgrelay() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_msgrelay"));
    command.arg("--log-level").arg("error");
    command
}

#[test]
fn exec_reports_output_and_exit_code() {
    let output = msgrelay()
        .args(["--format", "json", "exec", "sh", "-c", "printf out; printf err >&2; exit 5"])
        .output()
        .expect("exec command should run");

    assert_eq!(output.status.code(), Some(5));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("exec output should be json");
    assert_eq!(report["command"], "sh");
    assert_eq!(report["exit_code"], 5);
    assert_eq!(report["stdout"], "out");
    assert_eq!(report["stderr"], "err");
    assert!(report["pid"].as_u64().is_some());
}

#[test]
fn exec_raw_passes_streams_through() {
    let output = msgrelay()
        .args(["--format", "raw", "exec", "sh", "-c", "echo hello; echo oops >&2"])
        .output()
        .expect("exec command should run");

    assert!(output.status.success());
    assert_eq!(output.stdout, b"hello\n");
    assert_eq!(output.stderr, b"oops\n");
}

#[test]
fn exec_closes_child_stdin() {
    let output = msgrelay()
        .args(["--format", "raw", "exec", "cat"])
        .output()
        .expect("exec command should run");

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn exec_reports_exit_code_of_signalled_child() {
    let output = msgrelay()
        .args(["--format", "json", "exec", "sh", "-c", "printf before; kill -TERM $$"])
        .output()
        .expect("exec command should run");

    assert_eq!(output.status.code(), Some(128 + 15));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("exec output should be json");
    assert_eq!(report["exit_code"], 143);
    assert_eq!(report["stdout"], "before");
}

#[test]
fn exec_missing_program_fails_to_spawn() {
    let output = msgrelay()
        .args(["exec", "/nonexistent/msgrelay-program"])
        .output()
        .expect("exec command should run");

    assert_eq!(output.status.code(), Some(4));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("exec failed"), "stderr: {stderr}");
}

#[test]
fn version_names_the_binary() {
    let output = msgrelay()
        .arg("version")
        .output()
        .expect("version command should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("msgrelay "), "stdout: {stdout}");
}
