//! Build metadata baked in by `build.rs`, used for the startup banner.

use once_cell::sync::Lazy;

#[derive(Debug)]
struct BuildInfo {
    id: &'static str,
    time: &'static str,
    git: &'static str,
}

static INFO: Lazy<BuildInfo> = Lazy::new(|| BuildInfo {
    id: option_env!("CONVLOG_BUILD_ID").unwrap_or("unknown build"),
    time: option_env!("CONVLOG_BUILD_TIME").unwrap_or("unknown time"),
    git: option_env!("CONVLOG_BUILD_GIT").unwrap_or("unknown git"),
});

/// Full build identifier, e.g. `2026-10-17 09:12:44 UTC | 8a4f1d2`.
pub fn build_id() -> &'static str {
    INFO.id
}

pub fn build_timestamp() -> &'static str {
    INFO.time
}

pub fn git_label() -> &'static str {
    INFO.git
}

/// One-line banner for a binary: `<package> <version> | <build id>`.
pub fn banner(package: &str, version: &str) -> String {
    format!("{} {} | {}", package, version, build_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_carries_package_version_and_build() {
        let line = banner("convlog-server", "0.1.0");
        assert!(line.starts_with("convlog-server 0.1.0 | "));
        assert!(line.ends_with(build_id()));
        assert!(!build_timestamp().is_empty());
        assert!(!git_label().is_empty());
    }
}
