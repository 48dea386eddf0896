//! Deploy throttling over the attempt ledger

use chrono::{DateTime, Duration, Utc};
use hostkit_api::RateLimitStatus;
use tracing::{debug, warn};

use crate::errors::{DeployError, DeployErrorKind, HostkitError};
use crate::ledger::{DeployAttempt, NewDeployAttempt, RateLimitConfig, Store};
use crate::storage::settings::RateLimitDefaults;

/// Sliding-window and failure-cooldown throttle
#[derive(Clone)]
pub struct RateLimiter {
    store: Store,
    defaults: RateLimitDefaults,
}

impl RateLimiter {
    pub fn new(store: Store, defaults: RateLimitDefaults) -> Self {
        Self { store, defaults }
    }

    /// Stored config of `project`, or the host defaults
    pub async fn get_config(&self, project: &str) -> Result<RateLimitConfig, HostkitError> {
        Ok(self
            .store
            .get_rate_limit(project)
            .await?
            .unwrap_or_else(|| RateLimitConfig {
                project_name: project.to_string(),
                max_deploys: self.defaults.max_deploys,
                window_minutes: self.defaults.window_minutes,
                failure_cooldown_minutes: self.defaults.failure_cooldown_minutes,
                consecutive_failure_limit: self.defaults.consecutive_failure_limit,
            }))
    }

    pub async fn set_config(&self, config: &RateLimitConfig) -> Result<(), HostkitError> {
        self.store.upsert_rate_limit(config).await
    }

    /// Fail with `RateLimitExceeded` when `project` may not deploy now
    pub async fn check_rate_limit(&self, project: &str) -> Result<(), DeployError> {
        self.check_rate_limit_at(project, Utc::now()).await
    }

    pub async fn check_rate_limit_at(&self, project: &str, now: DateTime<Utc>) -> Result<(), DeployError> {
        let config = self.get_config(project).await?;

        let since = now - Duration::minutes(config.window_minutes as i64);
        let in_window = self.store.count_throttled_attempts_since(project, since).await?;
        if in_window >= config.max_deploys {
            warn!(project = %project, in_window, max = config.max_deploys, "Deploy rate limit reached");
            return Err(DeployError::new(
                DeployErrorKind::RateLimitExceeded,
                format!(
                    "{project} has {in_window} deploys in the last {} minutes (limit {})",
                    config.window_minutes, config.max_deploys
                ),
            )
            .with_suggestion("wait for the window to pass, or rerun with --override-ratelimit"));
        }

        let (streak, last_failure) = self.failure_streak(project).await?;
        if config.consecutive_failure_limit > 0 && streak >= config.consecutive_failure_limit {
            if let Some(last) = last_failure {
                let until = last + Duration::minutes(config.failure_cooldown_minutes as i64);
                if now < until {
                    warn!(project = %project, streak, "Deploy cooldown after consecutive failures");
                    return Err(DeployError::new(
                        DeployErrorKind::RateLimitExceeded,
                        format!(
                            "{project} failed {streak} times in a row; cooling down until {}",
                            until.to_rfc3339()
                        ),
                    )
                    .with_suggestion("fix the failing build first, or rerun with --override-ratelimit"));
                }
            }
        }

        debug!(project = %project, in_window, streak, "Rate limit check passed");
        Ok(())
    }

    /// Append an attempt to the ledger
    pub async fn record_deploy(&self, attempt: &NewDeployAttempt) -> Result<(), HostkitError> {
        self.store.insert_attempt(attempt).await?;
        Ok(())
    }

    pub async fn status(&self, project: &str) -> Result<RateLimitStatus, HostkitError> {
        self.status_at(project, Utc::now()).await
    }

    pub async fn status_at(&self, project: &str, now: DateTime<Utc>) -> Result<RateLimitStatus, HostkitError> {
        let config = self.get_config(project).await?;
        let since = now - Duration::minutes(config.window_minutes as i64);
        let in_window = self.store.count_throttled_attempts_since(project, since).await?;
        let (streak, last_failure) = self.failure_streak(project).await?;

        let cooldown_until = last_failure
            .filter(|_| config.consecutive_failure_limit > 0 && streak >= config.consecutive_failure_limit)
            .map(|last| last + Duration::minutes(config.failure_cooldown_minutes as i64))
            .filter(|until| *until > now);

        Ok(RateLimitStatus {
            project: project.to_string(),
            max_deploys: config.max_deploys,
            window_minutes: config.window_minutes,
            deploys_in_window: in_window,
            remaining: config.max_deploys.saturating_sub(in_window),
            consecutive_failures: streak,
            cooldown_until,
        })
    }

    /// Latest attempts, newest first
    pub async fn history(&self, project: &str, limit: u32) -> Result<Vec<DeployAttempt>, HostkitError> {
        self.store.recent_attempts(project, limit).await
    }

    /// Failures at the head of the ledger, up to the first success, and the
    /// time of the newest one
    async fn failure_streak(&self, project: &str) -> Result<(u32, Option<DateTime<Utc>>), HostkitError> {
        let recent = self
            .store
            .recent_attempts(project, self.defaults.failure_scan_limit)
            .await?;
        let streak = recent.iter().take_while(|a| !a.success).count() as u32;
        let last_failure = recent.first().filter(|a| !a.success).map(|a| a.deployed_at);
        Ok((streak, last_failure))
    }
}
