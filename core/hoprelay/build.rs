// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::process::Command;

fn set_env(name: &str, cmd: &mut Command) {
    let value = match cmd.output() {
        Ok(output) => String::from_utf8(output.stdout).unwrap_or_default(),
        Err(err) => {
            println!("cargo:warning={}", err);
            "".to_string()
        }
    };
    println!("cargo:rustc-env={}={}", name, value.trim());
}

fn version() -> String {
    if let Ok(v) = std::env::var("VERSION") {
        if !v.is_empty() {
            return v;
        }
    }

    std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.1.0-dev".to_string())
}

fn main() {
    set_env(
        "GIT_SHA",
        Command::new("git").args(["rev-parse", "--short", "HEAD"]),
    );

    // ISO 8601 UTC
    set_env(
        "BUILD_DATE",
        Command::new("date").args(["-u", "+%Y-%m-%dT%H:%M:%SZ"]),
    );

    println!("cargo:rustc-env=VERSION={}", version());
    println!("cargo:rerun-if-env-changed=VERSION");

    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=PROFILE={profile}");
}
