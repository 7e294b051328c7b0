use std::process::Command;

use crate::common::init_test_logging;

fn lumind() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_lumind"));
    cmd.env_remove("LUMIN_CONFIG");
    cmd
}

#[test]
fn test_lumind_help_includes_usage() {
    init_test_logging();
    crate::test_log!("TEST START: test_lumind_help_includes_usage");

    let output = lumind()
        .arg("--help")
        .output()
        .expect("Failed to run lumind --help");

    assert!(output.status.success(), "lumind --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("lumind") && stdout.contains("link"),
        "Expected help output to mention lumind and link, got: {stdout}"
    );

    crate::test_log!("TEST PASS: test_lumind_help_includes_usage");
}

#[test]
fn test_link_creates_project() {
    init_test_logging();
    crate::test_log!("TEST START: test_link_creates_project");

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data").join("lumin.db");
    let output = lumind()
        .env("LUMIN_DATABASE_PATH", &db)
        .args(["link", "--owner", "acme", "--repo", "site", "--domain", "acme"])
        .output()
        .expect("Failed to run lumind link");

    assert!(
        output.status.success(),
        "lumind link failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let project: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(project["name"], "site");
    assert_eq!(project["githubOwner"], "acme");
    assert_eq!(project["hasIndex"], false);
    assert!(db.exists());

    // The same repository cannot be linked twice.
    let output = lumind()
        .env("LUMIN_DATABASE_PATH", &db)
        .args(["link", "--owner", "ACME", "--repo", "Site"])
        .output()
        .expect("Failed to run lumind link");
    assert!(!output.status.success());

    crate::test_log!("TEST PASS: test_link_creates_project");
}

#[test]
fn test_missing_explicit_config_fails() {
    let output = lumind()
        .args(["--config", "/nonexistent/lumind.toml", "link", "--owner", "a", "--repo", "b"])
        .output()
        .expect("Failed to run lumind");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[LUM-E001]"), "Expected the error code, got: {stderr}");
    assert!(
        stderr.contains("Remediation steps:") && stderr.contains("LUMIN_CONFIG"),
        "Expected remediation steps, got: {stderr}"
    );
    assert!(stderr.contains("/nonexistent/lumind.toml"));
}
