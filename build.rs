// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=RGBD_CAPTURE_VERSION");

    // Packagers can pin the reported version
    let version = match std::env::var("RGBD_CAPTURE_VERSION") {
        Ok(v) => v,
        Err(_) => build_version(),
    };

    println!("cargo::rustc-env=RGBD_CAPTURE_BUILD_VERSION={}", version);
}

/// Crate version, suffixed with the short commit hash when built from a git checkout
///
/// - "0.1.0" outside a repository
/// - "0.1.0-abcdef1" in a clean checkout
/// - "0.1.0-dirty-abcdef1" with uncommitted changes
fn build_version() -> String {
    let pkg_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());

    let Some(hash) = git_output(&["rev-parse", "--short", "HEAD"]) else {
        return pkg_version;
    };

    let dirty = git_output(&["status", "--porcelain", "--untracked-files=no"])
        .map(|status| !status.is_empty())
        .unwrap_or(false);

    if dirty {
        format!("{}-dirty-{}", pkg_version, hash)
    } else {
        format!("{}-{}", pkg_version, hash)
    }
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
