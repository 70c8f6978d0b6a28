//! Operating system version detection.

use std::sync::LazyLock;

/// Cached OS build number.
static BUILD_NUMBER: LazyLock<u32> = LazyLock::new(detect_build_number);

/// Returns the running Windows build number, or `0` when it cannot be determined.
///
/// The result is cached after the first call.
pub fn build_number() -> u32 {
    *BUILD_NUMBER
}

#[cfg(windows)]
fn detect_build_number() -> u32 {
    use winreg::RegKey;
    use winreg::enums::HKEY_LOCAL_MACHINE;

    const CURRENT_VERSION: &str = "SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion";

    let build = RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey(CURRENT_VERSION)
        .and_then(|key| key.get_value::<String, _>("CurrentBuildNumber"));
    match build {
        Ok(build) => parse_build(&build),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read OS build number");
            0
        }
    }
}

#[cfg(not(windows))]
fn detect_build_number() -> u32 {
    0
}

#[cfg_attr(not(windows), allow(dead_code))]
fn parse_build(raw: &str) -> u32 {
    raw.trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build() {
        assert_eq!(parse_build("19045"), 19045);
        assert_eq!(parse_build(" 22631\n"), 22631);
        assert_eq!(parse_build("n/a"), 0);
    }

    #[test]
    fn test_build_number_is_cached() {
        assert_eq!(build_number(), build_number());
    }
}
