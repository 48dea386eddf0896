//! SQLite-backed ledger of operational state.
//!
//! A single [`Store`] is opened at process start and handed to the
//! orchestrator and every controller. Each mutating call runs in its own
//! statement or transaction; nothing holds a transaction across
//! orchestration steps.

pub mod checkpoints;
pub mod history;
pub mod leases;
pub mod limits;
pub mod projects;
pub mod releases;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::errors::HostkitError;

pub use checkpoints::CheckpointRecord;
pub use history::{DeployAttempt, NewDeployAttempt};
pub use limits::{AutoPauseConfig, RateLimitConfig};
pub use projects::{NewProject, Project, RuntimeKind};
pub use releases::Release;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle to the ledger
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Wrap an existing, already migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the ledger file at `path` and run migrations
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, HostkitError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory ledger
    pub async fn in_memory() -> Result<Self, HostkitError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
