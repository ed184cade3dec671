//! Drives a shell-script stand-in for the toolchain through the profile layer.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::tempdir;
use toolchain_env::{
    invoke, is_toolchain_available, repair_support_libraries, ToolchainBinary, ToolchainCommand,
    ToolchainProfile,
};

/// Script that echoes its arguments; `--version` prints a version line and
/// `cache` fails so repair sequences can be observed stopping early.
fn write_fake_toolchain(dir: &Path) -> PathBuf {
    let path = dir.join("fake-dfx");
    let script = r#"#!/bin/sh
case "$1" in
  --version) echo "fake-dfx 0.1.0"; exit 0 ;;
  cache) echo "cache unavailable" >&2; exit 2 ;;
esac
echo "args: $*"
"#;
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn version_check_reports_available() {
    let dir = tempdir().unwrap();
    let path = write_fake_toolchain(dir.path());
    let binary = ToolchainBinary::resolve("dfx", Some(&path)).unwrap();

    assert!(is_toolchain_available(&binary, &ToolchainProfile::default()).await);
}

#[tokio::test]
async fn install_renders_module_placeholder() {
    let dir = tempdir().unwrap();
    let path = write_fake_toolchain(dir.path());
    let binary = ToolchainBinary::at(&path).unwrap();

    let out = invoke(
        &binary,
        &ToolchainProfile::default(),
        &ToolchainCommand::Install {
            module: "Echo".to_string(),
        },
        dir.path(),
    )
    .await
    .expect("invoke install");

    assert!(out.success());
    assert_eq!(out.stdout.trim(), "args: deploy Echo --yes");
}

#[tokio::test]
async fn repair_stops_at_failing_cache_step() {
    let dir = tempdir().unwrap();
    let path = write_fake_toolchain(dir.path());
    let binary = ToolchainBinary::at(&path).unwrap();

    let out = repair_support_libraries(&binary, &ToolchainProfile::default(), dir.path())
        .await
        .expect("spawn");

    assert!(!out.success());
    assert_eq!(out.exit_code, 2);
    assert!(out.stdout.contains("args: upgrade"));
    assert!(out.stderr.contains("cache unavailable"));
}
