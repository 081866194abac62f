use std::env;
use std::path::Path;
use std::process::Command;

use chrono::Utc;

fn main() {
    println!("cargo:rerun-if-env-changed=CONVLOG_BUILD_ID_OVERRIDE");
    if Path::new(".git/HEAD").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
    }

    let build_time = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let git_label = git_commit().unwrap_or_else(|| "unknown".to_string());
    let build_id = env::var("CONVLOG_BUILD_ID_OVERRIDE")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| format!("{} | {}", build_time, git_label));

    println!("cargo:rustc-env=CONVLOG_BUILD_ID={}", build_id);
    println!("cargo:rustc-env=CONVLOG_BUILD_TIME={}", build_time);
    println!("cargo:rustc-env=CONVLOG_BUILD_GIT={}", git_label);
}

fn git_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let label = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!label.is_empty()).then_some(label)
}
