//! Deploy attempt ledger (append-only)

use chrono::{DateTime, Utc};
use hostkit_api::SourceType;
use serde::Serialize;

use super::Store;
use crate::errors::HostkitError;

/// One recorded deploy invocation
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeployAttempt {
    pub id: i64,
    pub project_name: String,
    pub deployed_at: DateTime<Utc>,
    pub deployed_by: String,
    pub success: bool,
    pub duration_ms: i64,
    pub source_type: String,
    pub files_synced: i64,
    pub override_used: bool,
    pub error_message: Option<String>,
}

/// Fields of an attempt about to be recorded
#[derive(Debug, Clone)]
pub struct NewDeployAttempt {
    pub project_name: String,
    pub deployed_at: DateTime<Utc>,
    pub deployed_by: String,
    pub success: bool,
    pub duration_ms: u64,
    pub source_type: SourceType,
    pub files_synced: u64,
    pub override_used: bool,
    pub error_message: Option<String>,
}

impl Store {
    pub async fn insert_attempt(&self, attempt: &NewDeployAttempt) -> Result<i64, HostkitError> {
        let result = sqlx::query(
            r#"
            INSERT INTO deploy_history
                (project_name, deployed_at, deployed_by, success, duration_ms,
                 source_type, files_synced, override_used, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt.project_name)
        .bind(attempt.deployed_at)
        .bind(&attempt.deployed_by)
        .bind(attempt.success)
        .bind(attempt.duration_ms as i64)
        .bind(attempt.source_type.as_str())
        .bind(attempt.files_synced as i64)
        .bind(attempt.override_used)
        .bind(&attempt.error_message)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Latest attempts of a project, newest first
    pub async fn recent_attempts(
        &self,
        project: &str,
        limit: u32,
    ) -> Result<Vec<DeployAttempt>, HostkitError> {
        let attempts = sqlx::query_as::<_, DeployAttempt>(
            r#"
            SELECT id, project_name, deployed_at, deployed_by, success, duration_ms,
                   source_type, files_synced, override_used, error_message
            FROM deploy_history
            WHERE project_name = ?
            ORDER BY deployed_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(project)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        Ok(attempts)
    }

    /// Attempts without the override flag at or after `since`
    pub async fn count_throttled_attempts_since(
        &self,
        project: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, HostkitError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM deploy_history
            WHERE project_name = ? AND deployed_at >= ? AND override_used = 0
            "#,
        )
        .bind(project)
        .bind(since)
        .fetch_one(self.pool())
        .await?;

        Ok(count as u32)
    }

    /// Failed attempts at or after `since`
    pub async fn count_failures_since(
        &self,
        project: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, HostkitError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM deploy_history
            WHERE project_name = ? AND deployed_at >= ? AND success = 0
            "#,
        )
        .bind(project)
        .bind(since)
        .fetch_one(self.pool())
        .await?;

        Ok(count as u32)
    }
}
