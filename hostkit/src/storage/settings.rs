//! Settings file management

use serde::{Deserialize, Serialize};

use crate::errors::HostkitError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stderr
    #[serde(default)]
    pub log_json: bool,

    /// Deploy pipeline configuration
    #[serde(default)]
    pub deploy: DeploySettings,

    /// Rate limits used when a project has no row of its own
    #[serde(default)]
    pub rate_limit: RateLimitDefaults,

    /// Auto-pause configuration used when a project has no row of its own
    #[serde(default)]
    pub auto_pause: AutoPauseDefaults,
}

impl Settings {
    /// Load settings, falling back to defaults when the file is absent
    pub async fn load(file: &File) -> Result<Self, HostkitError> {
        match file.read_string_opt().await? {
            Some(contents) => serde_json::from_str(&contents)
                .map_err(|e| HostkitError::ConfigError(format!("{}: {e}", file.path().display()))),
            None => Ok(Self::default()),
        }
    }
}

/// Deploy pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Number of releases kept on disk per project
    #[serde(default = "default_release_retention")]
    pub release_retention: u32,

    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,

    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,

    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,

    /// Timeout for process supervisor calls
    #[serde(default = "default_service_timeout")]
    pub service_timeout_secs: u64,

    /// How long a deploy lease outlives its last renewal; the holder renews
    /// it every third of this while the deploy runs
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    #[serde(default = "default_validation_interval")]
    pub validation_interval_ms: u64,

    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,

    /// Log lines pulled for failure diagnosis
    #[serde(default = "default_validation_log_lines")]
    pub validation_log_lines: u32,

    /// Prefix of the supervised unit name
    #[serde(default = "default_unit_prefix")]
    pub unit_prefix: String,
}

fn default_release_retention() -> u32 {
    5
}

fn default_clone_timeout() -> u64 {
    120
}

fn default_install_timeout() -> u64 {
    600
}

fn default_build_timeout() -> u64 {
    900
}

fn default_service_timeout() -> u64 {
    60
}

fn default_lease_ttl() -> u64 {
    120
}

fn default_validation_interval() -> u64 {
    1000
}

fn default_validation_timeout() -> u64 {
    15
}

fn default_validation_log_lines() -> u32 {
    50
}

fn default_unit_prefix() -> String {
    "hostkit-".to_string()
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            release_retention: default_release_retention(),
            clone_timeout_secs: default_clone_timeout(),
            install_timeout_secs: default_install_timeout(),
            build_timeout_secs: default_build_timeout(),
            service_timeout_secs: default_service_timeout(),
            lease_ttl_secs: default_lease_ttl(),
            validation_interval_ms: default_validation_interval(),
            validation_timeout_secs: default_validation_timeout(),
            validation_log_lines: default_validation_log_lines(),
            unit_prefix: default_unit_prefix(),
        }
    }
}

/// Fallback rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    #[serde(default = "default_max_deploys")]
    pub max_deploys: u32,

    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,

    #[serde(default = "default_failure_cooldown")]
    pub failure_cooldown_minutes: u32,

    #[serde(default = "default_consecutive_failure_limit")]
    pub consecutive_failure_limit: u32,

    /// How many of the latest attempts are scanned for a failure streak
    #[serde(default = "default_failure_scan_limit")]
    pub failure_scan_limit: u32,
}

fn default_max_deploys() -> u32 {
    10
}

fn default_window_minutes() -> u32 {
    60
}

fn default_failure_cooldown() -> u32 {
    5
}

fn default_consecutive_failure_limit() -> u32 {
    3
}

fn default_failure_scan_limit() -> u32 {
    10
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            max_deploys: default_max_deploys(),
            window_minutes: default_window_minutes(),
            failure_cooldown_minutes: default_failure_cooldown(),
            consecutive_failure_limit: default_consecutive_failure_limit(),
            failure_scan_limit: default_failure_scan_limit(),
        }
    }
}

/// Fallback auto-pause configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoPauseDefaults {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

impl Default for AutoPauseDefaults {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            window_minutes: default_window_minutes(),
        }
    }
}
