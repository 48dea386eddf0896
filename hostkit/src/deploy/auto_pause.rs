//! Failure-threshold circuit breaker

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::errors::{DeployError, DeployErrorKind, HostkitError};
use crate::ledger::{AutoPauseConfig, Store};
use crate::storage::settings::AutoPauseDefaults;

/// Blocks deploys of a project after repeated failures until cleared
#[derive(Clone)]
pub struct AutoPauseController {
    store: Store,
    defaults: AutoPauseDefaults,
}

impl AutoPauseController {
    pub fn new(store: Store, defaults: AutoPauseDefaults) -> Self {
        Self { store, defaults }
    }

    /// Stored config of `project`, or the host defaults (never paused)
    pub async fn get_config(&self, project: &str) -> Result<AutoPauseConfig, HostkitError> {
        Ok(self
            .store
            .get_auto_pause(project)
            .await?
            .unwrap_or_else(|| self.default_config(project)))
    }

    /// Upsert the tunables; clears any pause in place
    pub async fn set_config(&self, config: &AutoPauseConfig) -> Result<(), HostkitError> {
        self.store.upsert_auto_pause(config).await?;
        info!(project = %config.project_name, "Updated auto-pause config");
        Ok(())
    }

    /// Fail with `AutoPaused` while the project is paused. Read-only.
    pub async fn check_before_deploy(&self, project: &str) -> Result<(), DeployError> {
        let Some(config) = self.store.get_auto_pause(project).await? else {
            return Ok(());
        };
        if !config.paused {
            return Ok(());
        }

        let since = config
            .paused_at
            .map(|at| format!(" since {}", at.to_rfc3339()))
            .unwrap_or_default();
        let reason = config.paused_reason.as_deref().unwrap_or("repeated deploy failures");
        Err(DeployError::new(
            DeployErrorKind::AutoPaused,
            format!("Deploys of {project} are paused{since}: {reason}"),
        )
        .with_suggestion(format!(
            "investigate the failures, then run `hostkit autopause clear --project={project}`"
        )))
    }

    pub async fn pause(&self, project: &str, reason: &str) -> Result<(), HostkitError> {
        self.pause_at(project, reason, Utc::now()).await
    }

    async fn pause_at(&self, project: &str, reason: &str, at: DateTime<Utc>) -> Result<(), HostkitError> {
        let config = self.get_config(project).await?;
        self.store.set_paused(&config, reason, at).await?;
        warn!(project = %project, reason = %reason, "Paused deploys");
        Ok(())
    }

    /// Returns whether a pause was lifted
    pub async fn clear(&self, project: &str) -> Result<bool, HostkitError> {
        let cleared = self.store.clear_pause(project).await?;
        if cleared {
            info!(project = %project, "Cleared deploy pause");
        }
        Ok(cleared)
    }

    /// Failure observer: pause `project` when its failures in the window
    /// reach the threshold. Returns whether the project is paused afterwards.
    pub async fn evaluate(&self, project: &str) -> Result<bool, HostkitError> {
        self.evaluate_at(project, Utc::now()).await
    }

    pub async fn evaluate_at(&self, project: &str, now: DateTime<Utc>) -> Result<bool, HostkitError> {
        let config = self.get_config(project).await?;
        if config.paused {
            return Ok(true);
        }
        if !config.enabled || config.failure_threshold == 0 {
            return Ok(false);
        }

        let since = now - Duration::minutes(config.window_minutes as i64);
        let failures = self.store.count_failures_since(project, since).await?;
        if failures < config.failure_threshold {
            return Ok(false);
        }

        let reason = format!(
            "{failures} failed deploys in the last {} minutes (threshold {})",
            config.window_minutes, config.failure_threshold
        );
        self.pause_at(project, &reason, now).await?;
        Ok(true)
    }

    fn default_config(&self, project: &str) -> AutoPauseConfig {
        AutoPauseConfig {
            project_name: project.to_string(),
            enabled: self.defaults.enabled,
            failure_threshold: self.defaults.failure_threshold,
            window_minutes: self.defaults.window_minutes,
            paused: false,
            paused_at: None,
            paused_reason: None,
        }
    }
}
