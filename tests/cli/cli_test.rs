//! CLI contract tests.

use std::path::Path;

use assert_cmd::Command;

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).expect("write file");
}

/// A config file pointing at `policies`, plus the command preloaded with it.
fn command_for(root: &Path, policies: &Path) -> Command {
    let config = root.join("config.toml");
    std::fs::write(
        &config,
        format!("[policy]\ndirectory = {:?}\n", policies.display().to_string()),
    )
    .expect("write config");

    let mut cmd = Command::cargo_bin("mount-guard").expect("binary");
    cmd.arg("--config")
        .arg(&config)
        .env_remove("MOUNT_GUARD_POLICY_DIR")
        .env_remove("MOUNT_GUARD_SOCKET")
        .env_remove("MOUNT_GUARD_USER_SOURCE");
    cmd
}

#[test]
fn check_lists_loaded_policies() {
    let root = tempfile::tempdir().expect("tempdir");
    let policies = root.path().join("policies");
    std::fs::create_dir(&policies).expect("mkdir");
    write(&policies, "alice.json", r#"{"user":"alice","allowedMounts":["/data/alice"]}"#);

    let output = command_for(root.path(), &policies)
        .arg("check")
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 policies loaded"), "{stdout}");
    assert!(stdout.contains("alice: /data/alice"), "{stdout}");
}

#[test]
fn check_fails_on_rejected_files() {
    let root = tempfile::tempdir().expect("tempdir");
    let policies = root.path().join("policies");
    std::fs::create_dir(&policies).expect("mkdir");
    write(&policies, "bob.json", r#"{"user":"bob","allowedMounts":[]}"#);
    write(&policies, "broken.json", "{");

    let output = command_for(root.path(), &policies)
        .arg("check")
        .output()
        .expect("run");
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("rejected"), "{stdout}");
    assert!(stdout.contains("broken.json"), "{stdout}");
}

#[test]
fn check_fails_on_missing_directory() {
    let root = tempfile::tempdir().expect("tempdir");
    let output = command_for(root.path(), &root.path().join("absent"))
        .arg("check")
        .output()
        .expect("run");
    assert!(!output.status.success());
}

#[test]
fn evaluate_prints_decision() {
    let root = tempfile::tempdir().expect("tempdir");
    let policies = root.path().join("policies");
    std::fs::create_dir(&policies).expect("mkdir");
    write(&policies, "alice.json", r#"{"user":"alice","allowedMounts":["/data/alice"]}"#);

    let allowed = command_for(root.path(), &policies)
        .args(["evaluate", "--user", "alice", "--bind", "/data/alice/logs"])
        .output()
        .expect("run");
    assert!(allowed.status.success());
    assert_eq!(String::from_utf8_lossy(&allowed.stdout).trim(), "allow");

    let denied = command_for(root.path(), &policies)
        .args([
            "evaluate",
            "--user",
            "alice",
            "--bind",
            "/data/alice/logs",
            "--bind",
            "/etc/passwd",
        ])
        .output()
        .expect("run");
    let stdout = String::from_utf8_lossy(&denied.stdout);
    assert!(stdout.starts_with("deny:"), "{stdout}");
    assert!(stdout.contains("/etc/passwd"), "{stdout}");
}

#[test]
fn missing_explicit_config_is_an_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let output = Command::cargo_bin("mount-guard")
        .expect("binary")
        .arg("--config")
        .arg(root.path().join("nope.toml"))
        .arg("check")
        .output()
        .expect("run");
    assert!(!output.status.success());
}

#[test]
fn invalid_user_source_override_fails_startup() {
    let root = tempfile::tempdir().expect("tempdir");
    let policies = root.path().join("policies");
    std::fs::create_dir(&policies).expect("mkdir");

    let output = command_for(root.path(), &policies)
        .env("MOUNT_GUARD_USER_SOURCE", "nobody")
        .arg("check")
        .output()
        .expect("run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("MOUNT_GUARD_USER_SOURCE"), "{stderr}");
}
