//! Pre-deploy checkpoint rows

use chrono::{DateTime, Utc};

use super::Store;
use crate::errors::HostkitError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CheckpointRecord {
    pub id: String,
    pub project: String,
    pub label: String,
    pub checkpoint_type: String,
    pub trigger_source: String,
    pub path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub async fn insert_checkpoint(&self, record: &CheckpointRecord) -> Result<(), HostkitError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (id, project, label, checkpoint_type, trigger_source, path, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.project)
        .bind(&record.label)
        .bind(&record.checkpoint_type)
        .bind(&record.trigger_source)
        .bind(&record.path)
        .bind(record.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_checkpoint(&self, id: &str) -> Result<Option<CheckpointRecord>, HostkitError> {
        let record = sqlx::query_as::<_, CheckpointRecord>(
            r#"
            SELECT id, project, label, checkpoint_type, trigger_source, path, created_at
            FROM checkpoints
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(record)
    }
}
