use std::process::Command;

fn temp_path(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "cloudsave-cli-{label}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ))
}

#[test]
fn cli_list_scenarios_writes_output() {
    let exe = env!("CARGO_BIN_EXE_cloudsave-tester");
    let output_path = temp_path("list");
    let status = Command::new(exe)
        .args(["--list-scenarios", "--output"])
        .arg(&output_path)
        .status()
        .expect("run cli");
    assert!(status.success());
    let content = std::fs::read_to_string(output_path).expect("read output");
    assert!(content.contains("Available scenarios"));
    assert!(content.contains("load-slot-conflict"));
}

#[test]
fn cli_runs_reference_flows_with_markdown_report() {
    let exe = env!("CARGO_BIN_EXE_cloudsave-tester");
    let output_path = temp_path("run");
    let output = Command::new(exe)
        .args([
            "--report",
            "markdown",
            "--scenarios",
            "first-upload,keep-cloud",
            "--iterations",
            "2",
            "--seeds",
            "1,2",
            "--output",
        ])
        .arg(&output_path)
        .output()
        .expect("run cli");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Cloud Save Tester"));
    let report = std::fs::read_to_string(output_path).expect("read report");
    assert!(report.contains("# Cloud Save Test Results"));
    assert!(report.contains("- **Failed**: 0"));
}

#[test]
fn cli_rejects_malformed_seeds() {
    let exe = env!("CARGO_BIN_EXE_cloudsave-tester");
    let output = Command::new(exe)
        .args(["--seeds", "abc", "--scenarios", "codec-round-trip"])
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid seed 'abc'"));
}
