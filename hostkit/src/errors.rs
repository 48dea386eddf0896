//! Error types for HostKit

use std::fmt;

use hostkit_api::ErrorReport;
use thiserror::Error;

/// Low-level error raised by the ledger, filesystem and collaborator layers
#[derive(Error, Debug)]
pub enum HostkitError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Process error: {0}")]
    ProcessError(#[from] ProcessError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid project name `{0}`: use 1-63 lowercase letters, digits and dashes, starting with a letter or digit")]
    InvalidProjectName(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of an external command
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("`{program}` exited with code {code}: {stderr}")]
    ExitCode {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("IO error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::Timeout { .. })
    }
}

/// Kind of a deploy failure; callers branch on this
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeployErrorKind {
    ProjectNotFound,
    SourceNotFound,
    SourceNotDirectory,
    RateLimitExceeded,
    AutoPaused,
    DeployInProgress,
    IncompleteBundle,
    BuildFailed,
    BuildTimeout,
    InstallFailed,
    SyncFailed,
    ServiceStartFailed,
    ValidationFailed,
    GitCloneFailed,
    LegacyMigrationFailed,
    ReleaseNotFound,
    Internal,
}

impl DeployErrorKind {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DeployErrorKind::ProjectNotFound => "PROJECT_NOT_FOUND",
            DeployErrorKind::SourceNotFound => "SOURCE_NOT_FOUND",
            DeployErrorKind::SourceNotDirectory => "SOURCE_NOT_DIRECTORY",
            DeployErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            DeployErrorKind::AutoPaused => "AUTO_PAUSED",
            DeployErrorKind::DeployInProgress => "DEPLOY_IN_PROGRESS",
            DeployErrorKind::IncompleteBundle => "INCOMPLETE_BUNDLE",
            DeployErrorKind::BuildFailed => "BUILD_FAILED",
            DeployErrorKind::BuildTimeout => "BUILD_TIMEOUT",
            DeployErrorKind::InstallFailed => "INSTALL_FAILED",
            DeployErrorKind::SyncFailed => "SYNC_FAILED",
            DeployErrorKind::ServiceStartFailed => "SERVICE_START_FAILED",
            DeployErrorKind::ValidationFailed => "VALIDATION_FAILED",
            DeployErrorKind::GitCloneFailed => "GIT_CLONE_FAILED",
            DeployErrorKind::LegacyMigrationFailed => "LEGACY_MIGRATION_FAILED",
            DeployErrorKind::ReleaseNotFound => "RELEASE_NOT_FOUND",
            DeployErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether the same call may succeed if simply tried again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeployErrorKind::RateLimitExceeded
                | DeployErrorKind::DeployInProgress
                | DeployErrorKind::BuildTimeout
                | DeployErrorKind::GitCloneFailed
        )
    }
}

impl fmt::Display for DeployErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned by every orchestration operation
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct DeployError {
    pub kind: DeployErrorKind,
    pub message: String,
    pub suggestion: Option<String>,
}

impl DeployError {
    pub fn new(kind: DeployErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            code: self.kind.code().to_string(),
            message: self.message.clone(),
            suggestion: self.suggestion.clone(),
            retryable: self.kind.is_retryable(),
        }
    }
}

impl From<HostkitError> for DeployError {
    fn from(err: HostkitError) -> Self {
        DeployError::new(DeployErrorKind::Internal, err.to_string())
    }
}

impl From<sqlx::Error> for DeployError {
    fn from(err: sqlx::Error) -> Self {
        HostkitError::from(err).into()
    }
}
