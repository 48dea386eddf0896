//! Per-project deploy leases

use chrono::{DateTime, Utc};

use super::Store;
use crate::errors::HostkitError;

impl Store {
    /// Take the lease of `project` for `holder` until `until`.
    ///
    /// Succeeds when no lease exists or the existing one expired before
    /// `now`; returns false while another holder's lease is live.
    pub async fn try_acquire_lease(
        &self,
        project: &str,
        holder: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, HostkitError> {
        let result = sqlx::query(
            r#"
            INSERT INTO deploy_leases (project_name, holder, acquired_at, leased_until)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (project_name) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                leased_until = excluded.leased_until
            WHERE deploy_leases.leased_until < excluded.acquired_at
            "#,
        )
        .bind(project)
        .bind(holder)
        .bind(now)
        .bind(until)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Push the expiry of a lease `holder` still owns; false once it was lost
    pub async fn renew_lease(
        &self,
        project: &str,
        holder: &str,
        until: DateTime<Utc>,
    ) -> Result<bool, HostkitError> {
        let result = sqlx::query(
            "UPDATE deploy_leases SET leased_until = ? WHERE project_name = ? AND holder = ?",
        )
        .bind(until)
        .bind(project)
        .bind(holder)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Drop the lease if `holder` still owns it
    pub async fn release_lease(&self, project: &str, holder: &str) -> Result<(), HostkitError> {
        sqlx::query("DELETE FROM deploy_leases WHERE project_name = ? AND holder = ?")
            .bind(project)
            .bind(holder)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
