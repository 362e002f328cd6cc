//! Tool version parsing and feature gating.

use semver::Version;

/// `pull --rebase --autostash` requires a tool strictly newer than this.
pub const AUTOSTASH_AFTER: Version = Version::new(2, 9, 0);

/// Parse the leading numeric version out of `git --version` style output.
///
/// Accepts `git version 2.39.2 (Apple Git-143)`, `2.30.0.windows.1`, `2.9`.
pub fn parse_tool_version(raw: &str) -> Option<Version> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("git version").unwrap_or(raw).trim();
    let token = raw.split_whitespace().next()?;
    let mut parts = token
        .split('.')
        .map_while(|p| p.parse::<u64>().ok())
        .take(3);
    let major = parts.next()?;
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

pub fn rebase_supported(raw: &str) -> bool {
    parse_tool_version(raw).is_some_and(|v| v > AUTOSTASH_AFTER)
}
