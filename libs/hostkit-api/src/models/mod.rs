//! API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the code of a deploy came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Local,
    Git,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Local => "local",
            SourceType::Git => "git",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved source-control revision of a git deploy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRevision {
    pub repo: String,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub tag: Option<String>,
}

/// Outcome of the post-deploy health poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    /// Last service status observed
    pub status: String,
    pub elapsed_ms: u64,
    /// Set when the service passed but is still starting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Targeted remediation derived from the service logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Result of a successful deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
    pub project: String,
    pub release: String,
    pub release_path: String,
    pub source_type: SourceType,
    pub build_type: String,
    pub built: bool,
    /// Build commands run on the server, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_steps: Vec<String>,
    pub files_synced: u64,
    pub checkpoint_id: Option<String>,
    pub env_snapshot_captured: bool,
    pub dependencies_installed: bool,
    pub secrets_injected: u32,
    pub service_restarted: bool,
    pub releases_pruned: u32,
    pub override_used: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitRevision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    /// Non-fatal problems hit along the way
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl DeployReport {
    /// False only when validation ran and failed
    pub fn validation_passed(&self) -> bool {
        self.validation.as_ref().map(|v| v.passed).unwrap_or(true)
    }
}

/// Result of a rollback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackReport {
    pub project: String,
    pub release: String,
    pub previous_release: Option<String>,
    pub checkpoint_id: Option<String>,
    pub env_snapshot: Option<String>,
    pub service_restarted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
}

/// One release as listed to an operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSummary {
    pub name: String,
    pub path: String,
    pub state: String,
    pub is_current: bool,
    pub deployed_at: DateTime<Utc>,
    pub deployed_by: String,
    pub files_synced: u64,
    pub checkpoint_id: Option<String>,
    pub has_env_snapshot: bool,
    pub git_commit: Option<String>,
    pub git_branch: Option<String>,
}

/// Current throttle position of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub project: String,
    pub max_deploys: u32,
    pub window_minutes: u32,
    pub deploys_in_window: u32,
    pub remaining: u32,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// Machine-readable error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub retryable: bool,
}
