//! Utility functions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version information for the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Name of a release created at `now`, e.g. `20260301142233-1a2b3c4d`.
///
/// Names sort chronologically; the suffix keeps same-second deploys apart.
pub fn release_name(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d%H%M%S"), &suffix[..8])
}

/// Milliseconds elapsed since `start`
pub fn elapsed_ms(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_release_name_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 14, 22, 33).unwrap();
        let name = release_name(at);
        assert!(name.starts_with("20260301142233-"));
        assert_eq!(name.len(), 23);
        assert_ne!(name, release_name(at));
    }
}
