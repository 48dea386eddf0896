//! Release rows

use chrono::{DateTime, Utc};
use hostkit_api::GitRevision;
use sqlx::SqliteConnection;

use super::Store;
use crate::errors::HostkitError;

/// A release row
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Release {
    pub id: i64,
    pub project: String,
    pub release_name: String,
    pub release_path: String,
    pub deployed_at: DateTime<Utc>,
    /// First activation time; `None` while staged
    pub activated_at: Option<DateTime<Utc>>,
    pub is_current: bool,
    pub files_synced: i64,
    pub deployed_by: String,
    pub checkpoint_id: Option<String>,
    pub env_snapshot: Option<String>,
    pub git_commit: Option<String>,
    pub git_branch: Option<String>,
    pub git_tag: Option<String>,
    pub git_repo: Option<String>,
}

const RELEASE_COLUMNS: &str = "id, project, release_name, release_path, deployed_at, activated_at, \
                               is_current, files_synced, deployed_by, checkpoint_id, env_snapshot, \
                               git_commit, git_branch, git_tag, git_repo";

impl Store {
    pub async fn insert_release(
        &self,
        project: &str,
        release_name: &str,
        release_path: &str,
        deployed_by: &str,
        deployed_at: DateTime<Utc>,
    ) -> Result<Release, HostkitError> {
        let result = sqlx::query(
            r#"
            INSERT INTO releases (project, release_name, release_path, deployed_at, is_current, deployed_by)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(project)
        .bind(release_name)
        .bind(release_path)
        .bind(deployed_at)
        .bind(deployed_by)
        .execute(self.pool())
        .await?;

        self.get_release(result.last_insert_rowid())
            .await?
            .ok_or_else(|| HostkitError::NotFound(format!("release {release_name}")))
    }

    pub async fn get_release(&self, id: i64) -> Result<Option<Release>, HostkitError> {
        let release = sqlx::query_as::<_, Release>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(release)
    }

    pub async fn find_release(
        &self,
        project: &str,
        release_name: &str,
    ) -> Result<Option<Release>, HostkitError> {
        let release = sqlx::query_as::<_, Release>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases WHERE project = ? AND release_name = ?"
        ))
        .bind(project)
        .bind(release_name)
        .fetch_optional(self.pool())
        .await?;
        Ok(release)
    }

    /// All releases of a project, newest first
    pub async fn list_releases(&self, project: &str) -> Result<Vec<Release>, HostkitError> {
        let releases = sqlx::query_as::<_, Release>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases WHERE project = ? \
             ORDER BY deployed_at DESC, id DESC"
        ))
        .bind(project)
        .fetch_all(self.pool())
        .await?;
        Ok(releases)
    }

    pub async fn current_release(&self, project: &str) -> Result<Option<Release>, HostkitError> {
        let release = sqlx::query_as::<_, Release>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM releases WHERE project = ? AND is_current = 1"
        ))
        .bind(project)
        .fetch_optional(self.pool())
        .await?;
        Ok(release)
    }

    pub async fn set_release_files(&self, id: i64, files_synced: u64) -> Result<(), HostkitError> {
        sqlx::query("UPDATE releases SET files_synced = ? WHERE id = ?")
            .bind(files_synced as i64)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_release_git(&self, id: i64, git: &GitRevision) -> Result<(), HostkitError> {
        sqlx::query(
            r#"
            UPDATE releases
            SET git_commit = ?, git_branch = ?, git_tag = ?, git_repo = ?
            WHERE id = ?
            "#,
        )
        .bind(&git.commit)
        .bind(&git.branch)
        .bind(&git.tag)
        .bind(&git.repo)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Attach rollback metadata; `None` leaves the stored value untouched
    pub async fn set_release_snapshot(
        &self,
        id: i64,
        checkpoint_id: Option<&str>,
        env_snapshot: Option<&str>,
    ) -> Result<(), HostkitError> {
        sqlx::query(
            r#"
            UPDATE releases
            SET checkpoint_id = COALESCE(?, checkpoint_id),
                env_snapshot = COALESCE(?, env_snapshot)
            WHERE id = ?
            "#,
        )
        .bind(checkpoint_id)
        .bind(env_snapshot)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_release(&self, id: i64) -> Result<(), HostkitError> {
        sqlx::query("DELETE FROM releases WHERE id = ? AND is_current = 0")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

/// Make `release_id` the only current release of `project`.
///
/// Meant to run inside a caller-owned transaction. Returns false when the
/// release does not belong to the project.
pub async fn mark_current(
    conn: &mut SqliteConnection,
    project: &str,
    release_id: i64,
    now: DateTime<Utc>,
) -> Result<bool, HostkitError> {
    sqlx::query("UPDATE releases SET is_current = 0 WHERE project = ? AND id != ? AND is_current = 1")
        .bind(project)
        .bind(release_id)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query(
        r#"
        UPDATE releases
        SET is_current = 1,
            activated_at = COALESCE(activated_at, ?)
        WHERE project = ? AND id = ?
        "#,
    )
    .bind(now)
    .bind(project)
    .bind(release_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
