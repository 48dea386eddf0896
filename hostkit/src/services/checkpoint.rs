//! Pre-deploy database checkpoints

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::errors::HostkitError;
use crate::ledger::{CheckpointRecord, Store};
use crate::services::process::{CommandSpec, ProcessRunner};
use crate::storage::layout::HostLayout;

/// Checkpoint type taken before every deploy
pub const CHECKPOINT_TYPE_PRE_DEPLOY: &str = "pre_deploy";

/// Creates point-in-time snapshots of a project's database
#[async_trait]
pub trait CheckpointService: Send + Sync {
    /// Returns the checkpoint id
    async fn create_checkpoint(
        &self,
        project: &str,
        label: &str,
        checkpoint_type: &str,
        trigger: &str,
    ) -> Result<String, HostkitError>;
}

/// Tells whether a project owns a database
#[async_trait]
pub trait DatabasePresenceCheck: Send + Sync {
    async fn exists(&self, project: &str) -> Result<bool, HostkitError>;
}

/// [`CheckpointService`] dumping with `pg_dump` and recording the dump in the ledger
pub struct PgDumpCheckpointService {
    runner: Arc<dyn ProcessRunner>,
    store: Store,
    layout: HostLayout,
    timeout: Duration,
}

impl PgDumpCheckpointService {
    pub fn new(runner: Arc<dyn ProcessRunner>, store: Store, layout: HostLayout, timeout: Duration) -> Self {
        Self {
            runner,
            store,
            layout,
            timeout,
        }
    }
}

#[async_trait]
impl CheckpointService for PgDumpCheckpointService {
    async fn create_checkpoint(
        &self,
        project: &str,
        label: &str,
        checkpoint_type: &str,
        trigger: &str,
    ) -> Result<String, HostkitError> {
        let database = self
            .store
            .get_project(project)
            .await?
            .and_then(|p| p.database_name)
            .ok_or_else(|| HostkitError::NotFound(format!("database of project {project}")))?;

        let id = format!("cp-{}", uuid::Uuid::new_v4().simple());
        let dir = self.layout.checkpoints_dir(project);
        dir.create().await?;
        let path = dir.path().join(format!("{id}.dump"));

        let spec = CommandSpec::new("pg_dump")
            .args(["--format=custom", "--no-owner", "--file"])
            .arg(path.to_string_lossy())
            .arg(database.as_str())
            .timeout(self.timeout);
        self.runner.run_checked(&spec).await?;

        self.store
            .insert_checkpoint(&CheckpointRecord {
                id: id.clone(),
                project: project.to_string(),
                label: label.to_string(),
                checkpoint_type: checkpoint_type.to_string(),
                trigger_source: trigger.to_string(),
                path: Some(path.to_string_lossy().to_string()),
                created_at: Utc::now(),
            })
            .await?;

        info!(project = %project, checkpoint = %id, "Created checkpoint");
        Ok(id)
    }
}

/// A project owns a database when its `database_name` is set
pub struct LedgerDatabasePresence {
    store: Store,
}

impl LedgerDatabasePresence {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DatabasePresenceCheck for LedgerDatabasePresence {
    async fn exists(&self, project: &str) -> Result<bool, HostkitError> {
        Ok(self
            .store
            .get_project(project)
            .await?
            .is_some_and(|p| p.database_name.is_some()))
    }
}
