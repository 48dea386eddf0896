//! Per-project throttle and circuit breaker rows

use chrono::{DateTime, Utc};

use super::Store;
use crate::errors::HostkitError;

/// Rate limit row of a project
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RateLimitConfig {
    pub project_name: String,
    pub max_deploys: u32,
    pub window_minutes: u32,
    pub failure_cooldown_minutes: u32,
    pub consecutive_failure_limit: u32,
}

/// Auto-pause row of a project
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AutoPauseConfig {
    pub project_name: String,
    pub enabled: bool,
    pub failure_threshold: u32,
    pub window_minutes: u32,
    pub paused: bool,
    pub paused_at: Option<DateTime<Utc>>,
    pub paused_reason: Option<String>,
}

impl Store {
    pub async fn get_rate_limit(&self, project: &str) -> Result<Option<RateLimitConfig>, HostkitError> {
        let config = sqlx::query_as::<_, RateLimitConfig>(
            r#"
            SELECT project_name, max_deploys, window_minutes,
                   failure_cooldown_minutes, consecutive_failure_limit
            FROM rate_limits
            WHERE project_name = ?
            "#,
        )
        .bind(project)
        .fetch_optional(self.pool())
        .await?;
        Ok(config)
    }

    pub async fn upsert_rate_limit(&self, config: &RateLimitConfig) -> Result<(), HostkitError> {
        sqlx::query(
            r#"
            INSERT INTO rate_limits
                (project_name, max_deploys, window_minutes, failure_cooldown_minutes,
                 consecutive_failure_limit, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (project_name) DO UPDATE SET
                max_deploys = excluded.max_deploys,
                window_minutes = excluded.window_minutes,
                failure_cooldown_minutes = excluded.failure_cooldown_minutes,
                consecutive_failure_limit = excluded.consecutive_failure_limit,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&config.project_name)
        .bind(config.max_deploys)
        .bind(config.window_minutes)
        .bind(config.failure_cooldown_minutes)
        .bind(config.consecutive_failure_limit)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_auto_pause(&self, project: &str) -> Result<Option<AutoPauseConfig>, HostkitError> {
        let config = sqlx::query_as::<_, AutoPauseConfig>(
            r#"
            SELECT project_name, enabled, failure_threshold, window_minutes,
                   paused, paused_at, paused_reason
            FROM auto_pause
            WHERE project_name = ?
            "#,
        )
        .bind(project)
        .fetch_optional(self.pool())
        .await?;
        Ok(config)
    }

    /// Upsert the tunables of a project; any pause in place is cleared
    pub async fn upsert_auto_pause(&self, config: &AutoPauseConfig) -> Result<(), HostkitError> {
        sqlx::query(
            r#"
            INSERT INTO auto_pause
                (project_name, enabled, failure_threshold, window_minutes,
                 paused, paused_at, paused_reason, updated_at)
            VALUES (?, ?, ?, ?, 0, NULL, NULL, ?)
            ON CONFLICT (project_name) DO UPDATE SET
                enabled = excluded.enabled,
                failure_threshold = excluded.failure_threshold,
                window_minutes = excluded.window_minutes,
                paused = 0,
                paused_at = NULL,
                paused_reason = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&config.project_name)
        .bind(config.enabled)
        .bind(config.failure_threshold)
        .bind(config.window_minutes)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Flip the pause on; `defaults` seeds the row when none exists
    pub async fn set_paused(
        &self,
        defaults: &AutoPauseConfig,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), HostkitError> {
        sqlx::query(
            r#"
            INSERT INTO auto_pause
                (project_name, enabled, failure_threshold, window_minutes,
                 paused, paused_at, paused_reason, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT (project_name) DO UPDATE SET
                paused = 1,
                paused_at = excluded.paused_at,
                paused_reason = excluded.paused_reason,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&defaults.project_name)
        .bind(defaults.enabled)
        .bind(defaults.failure_threshold)
        .bind(defaults.window_minutes)
        .bind(at)
        .bind(reason)
        .bind(at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Reset `paused`, `paused_at` and `paused_reason` in one statement
    pub async fn clear_pause(&self, project: &str) -> Result<bool, HostkitError> {
        let result = sqlx::query(
            r#"
            UPDATE auto_pause
            SET paused = 0, paused_at = NULL, paused_reason = NULL, updated_at = ?
            WHERE project_name = ? AND paused = 1
            "#,
        )
        .bind(Utc::now())
        .bind(project)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
