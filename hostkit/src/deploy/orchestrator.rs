//! Deploy workflow

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use hostkit_api::{DeployReport, GitRevision, RollbackReport, SourceType, ValidationReport};
use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::deploy::auto_pause::AutoPauseController;
use crate::deploy::builder::{build_source, BuildLimits, BuiltSource};
use crate::deploy::detect::{detect, BuildType, STANDALONE_ENTRY_POINT};
use crate::deploy::fsm::ReleaseState;
use crate::deploy::git::GitRef;
use crate::deploy::lease::{DeployLease, LeaseManager};
use crate::deploy::rate_limit::RateLimiter;
use crate::deploy::release::ReleaseManager;
use crate::deploy::source::{validate_local_source, GitSource};
use crate::deploy::validate::{validate_service, ValidationPolicy};
use crate::deploy::Collaborators;
use crate::errors::{DeployError, DeployErrorKind};
use crate::filesys::dir::{is_sync_excluded, Dir};
use crate::ledger::{NewDeployAttempt, Project, Release, Store};
use crate::services::checkpoint::CHECKPOINT_TYPE_PRE_DEPLOY;
use crate::storage::layout::HostLayout;
use crate::storage::settings::Settings;
use crate::utils::elapsed_ms;

/// Knobs of a single deploy
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Recorded as `deployed_by`
    pub actor: String,
    /// Run install + build in an ephemeral copy first
    pub build: bool,
    /// Install runtime dependencies once the release is live
    pub install: bool,
    pub restart: bool,
    pub inject_secrets: bool,
    pub override_ratelimit: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            actor: "cli".to_string(),
            build: false,
            install: true,
            restart: true,
            inject_secrets: false,
            override_ratelimit: false,
        }
    }
}

/// Knobs of a rollback
#[derive(Debug, Clone)]
pub struct RollbackOptions {
    /// Release to go back to; defaults to the one before the current
    pub release: Option<String>,
    pub restart: bool,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            release: None,
            restart: true,
        }
    }
}

enum Source<'a> {
    Local(&'a Path),
    Git(&'a GitSource),
}

impl Source<'_> {
    fn source_type(&self) -> SourceType {
        match self {
            Source::Local(_) => SourceType::Local,
            Source::Git(_) => SourceType::Git,
        }
    }
}

/// What a failed deploy got through before failing
#[derive(Default)]
struct Progress {
    files_synced: u64,
}

/// Sequences gates, build, release activation and service restart
pub struct DeployOrchestrator {
    store: Store,
    layout: HostLayout,
    settings: Settings,
    releases: ReleaseManager,
    rate_limiter: RateLimiter,
    auto_pause: AutoPauseController,
    leases: LeaseManager,
    collaborators: Collaborators,
}

impl DeployOrchestrator {
    pub fn new(store: Store, layout: HostLayout, settings: Settings, collaborators: Collaborators) -> Self {
        let releases = ReleaseManager::new(
            store.clone(),
            layout.clone(),
            settings.deploy.release_retention,
        );
        let rate_limiter = RateLimiter::new(store.clone(), settings.rate_limit.clone());
        let auto_pause = AutoPauseController::new(store.clone(), settings.auto_pause.clone());
        let leases = LeaseManager::new(
            store.clone(),
            Duration::from_secs(settings.deploy.lease_ttl_secs),
        );

        Self {
            store,
            layout,
            settings,
            releases,
            rate_limiter,
            auto_pause,
            leases,
            collaborators,
        }
    }

    pub fn releases(&self) -> &ReleaseManager {
        &self.releases
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn auto_pause(&self) -> &AutoPauseController {
        &self.auto_pause
    }

    /// Deploy the tree at `source` (a path on this host)
    pub async fn deploy(
        &self,
        project: &str,
        source: &Path,
        opts: &DeployOptions,
    ) -> Result<DeployReport, DeployError> {
        self.run(project, Source::Local(source), opts).await
    }

    /// Deploy a git revision
    pub async fn deploy_from_git(
        &self,
        project: &str,
        git: &GitSource,
        opts: &DeployOptions,
    ) -> Result<DeployReport, DeployError> {
        self.run(project, Source::Git(git), opts).await
    }

    async fn run(
        &self,
        project: &str,
        source: Source<'_>,
        opts: &DeployOptions,
    ) -> Result<DeployReport, DeployError> {
        let started = Instant::now();
        let source_type = source.source_type();
        info!(project = %project, source = %source_type, "Starting deploy");

        let project_row = self.load_project(project).await?;

        self.auto_pause.check_before_deploy(project).await?;

        if !opts.override_ratelimit {
            if let Err(e) = self.rate_limiter.check_rate_limit(project).await {
                if e.kind == DeployErrorKind::RateLimitExceeded {
                    self.record_failure(project, opts, source_type, 0, started, &e).await;
                }
                return Err(e);
            }
        }

        let lease = match self.leases.acquire(project).await {
            Ok(lease) => lease,
            Err(e) => {
                self.record_failure(project, opts, source_type, 0, started, &e).await;
                return Err(e);
            }
        };

        let mut progress = Progress::default();
        let outcome = self
            .execute(&project_row, &source, opts, &lease, &mut progress)
            .await;

        let result = match outcome {
            Ok(mut report) => {
                report.duration_ms = elapsed_ms(started);
                let attempt = self.attempt(project, opts, source_type, report.files_synced, started, None);
                if let Err(e) = self.rate_limiter.record_deploy(&attempt).await {
                    error!(project = %project, "Failed to record deploy attempt: {}", e);
                    report.warnings.push(format!("deploy attempt not recorded: {e}"));
                }

                if report.service_restarted {
                    report.validation = Some(self.validate(project).await);
                }

                info!(
                    project = %project,
                    release = %report.release,
                    duration_ms = report.duration_ms,
                    "Deploy finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(project = %project, "Deploy failed: {}", e);
                self.record_failure(project, opts, source_type, progress.files_synced, started, &e)
                    .await;
                Err(e)
            }
        };

        self.leases.release(lease).await;
        result
    }

    /// Steps from source resolution to pruning; runs under the lease
    async fn execute(
        &self,
        project: &Project,
        source: &Source<'_>,
        opts: &DeployOptions,
        lease: &DeployLease,
        progress: &mut Progress,
    ) -> Result<DeployReport, DeployError> {
        let name = project.name.as_str();
        let deps = &self.collaborators;
        let mut warnings = Vec::new();

        // the clone directory lives until the end of this call
        let (source_dir, _clone, git_revision): (PathBuf, Option<TempDir>, Option<GitRevision>) =
            match source {
                Source::Local(path) => (validate_local_source(path).await?, None, None),
                Source::Git(git) => {
                    let (dir, revision) = self.clone_source(project, git).await?;
                    (dir.path().to_path_buf(), Some(dir), Some(revision))
                }
            };

        self.releases.migrate_to_releases(name).await?;

        let mut built: Option<BuiltSource> = None;
        if opts.build {
            let limits = BuildLimits {
                install: Duration::from_secs(self.settings.deploy.install_timeout_secs),
                build: Duration::from_secs(self.settings.deploy.build_timeout_secs),
            };
            built = Some(
                build_source(deps.runner.as_ref(), &self.layout.tmp_dir(), &source_dir, limits).await?,
            );
        }
        let final_dir = built
            .as_ref()
            .map(|b| b.path().to_path_buf())
            .unwrap_or_else(|| source_dir.clone());

        let env_snapshot = match deps.env.capture(name).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(project = %name, "Env snapshot failed: {}", e);
                warnings.push(format!("env snapshot not captured: {e}"));
                None
            }
        };

        let checkpoint_id = self.checkpoint(name, &mut warnings).await;

        let detection = detect(&final_dir);
        if let Some(warning) = &detection.warning {
            if detection.build_type == BuildType::FrameworkStandaloneBundle {
                return Err(DeployError::new(DeployErrorKind::IncompleteBundle, warning.clone())
                    .with_suggestion(
                        "rerun with --build so the bundle is produced on the server, \
                         or copy node_modules into .next/standalone before deploying",
                    ));
            }
            warnings.push(warning.clone());
        }
        info!(project = %name, build_type = %detection.build_type, "Detected build type");

        let release = self.releases.create_release(name, &opts.actor).await?;
        let files_synced = Dir::new(&final_dir)
            .copy_into(Path::new(&release.release_path), is_sync_excluded)
            .await
            .map_err(|e| {
                DeployError::new(
                    DeployErrorKind::SyncFailed,
                    format!("Failed to sync files into {}: {e}", release.release_name),
                )
                .with_suggestion("check free disk space and permissions, then deploy again")
            })?;
        progress.files_synced = files_synced;
        self.releases.update_files(&release, files_synced).await?;
        info!(project = %name, release = %release.release_name, files_synced, "Synced files");

        lease.ensure_held()?;
        let release = self.releases.activate(name, &release).await.map_err(|e| {
            DeployError::new(
                DeployErrorKind::Internal,
                format!("Failed to activate {}: {e}", release.release_name),
            )
        })?;

        self.releases
            .update_snapshot(&release, checkpoint_id.as_deref(), env_snapshot.as_deref())
            .await?;
        if let Some(revision) = &git_revision {
            self.releases.update_git_info(&release, revision).await?;
        }

        self.reconcile_entry_point(project, detection.build_type).await?;

        let mut dependencies_installed = false;
        if opts.install && detection.build_type != BuildType::FrameworkStandaloneBundle {
            dependencies_installed = deps
                .installer
                .install(name, project.runtime_kind())
                .await
                .map_err(|e| {
                    DeployError::new(
                        DeployErrorKind::InstallFailed,
                        format!("Dependency install failed: {e}"),
                    )
                    .with_suggestion("fix the dependency manifest, or rerun with --no-install")
                })?;
        }

        let mut secrets_injected = 0;
        if opts.inject_secrets {
            secrets_injected = match deps.secrets.inject(name).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(project = %name, "Secret injection failed: {}", e);
                    warnings.push(format!("secrets not injected: {e}"));
                    0
                }
            };
        }

        if opts.restart {
            self.restart(name).await?;
        }

        lease.ensure_held()?;
        let releases_pruned = match self.releases.cleanup_old_releases(name).await {
            Ok(pruned) => pruned,
            Err(e) => {
                warn!(project = %name, "Pruning old releases failed: {}", e);
                warnings.push(format!("old releases not pruned: {e}"));
                0
            }
        };

        Ok(DeployReport {
            project: name.to_string(),
            release: release.release_name.clone(),
            release_path: release.release_path.clone(),
            source_type: source.source_type(),
            build_type: detection.build_type.to_string(),
            built: built.is_some(),
            build_steps: built.map(|b| b.steps).unwrap_or_default(),
            files_synced,
            checkpoint_id,
            env_snapshot_captured: env_snapshot.is_some(),
            dependencies_installed,
            secrets_injected,
            service_restarted: opts.restart,
            releases_pruned,
            override_used: opts.override_ratelimit,
            duration_ms: 0,
            git: git_revision,
            validation: None,
            warnings,
        })
    }

    /// Re-activate an earlier release
    pub async fn rollback(&self, project: &str, opts: &RollbackOptions) -> Result<RollbackReport, DeployError> {
        let project_row = self.load_project(project).await?;
        self.auto_pause.check_before_deploy(project).await?;

        let lease = self.leases.acquire(project).await?;
        let result = self.rollback_locked(&project_row, opts, &lease).await;
        self.leases.release(lease).await;

        let mut report = result?;
        if report.service_restarted {
            report.validation = Some(self.validate(project).await);
        }
        Ok(report)
    }

    async fn rollback_locked(
        &self,
        project: &Project,
        opts: &RollbackOptions,
        lease: &DeployLease,
    ) -> Result<RollbackReport, DeployError> {
        let name = project.name.as_str();
        let current = self.releases.current_release(name).await?;
        let target = self.rollback_target(name, current.as_ref(), opts.release.as_deref()).await?;

        info!(project = %name, release = %target.release_name, "Rolling back");
        lease.ensure_held()?;
        let target = self.releases.activate(name, &target).await.map_err(|e| {
            DeployError::new(
                DeployErrorKind::Internal,
                format!("Failed to activate {}: {e}", target.release_name),
            )
        })?;

        let build_type = detect(Path::new(&target.release_path)).build_type;
        self.reconcile_entry_point(project, build_type).await?;

        if opts.restart {
            self.restart(name).await?;
        }

        Ok(RollbackReport {
            project: name.to_string(),
            release: target.release_name.clone(),
            previous_release: current.map(|r| r.release_name),
            checkpoint_id: target.checkpoint_id.clone(),
            env_snapshot: target.env_snapshot.clone(),
            service_restarted: opts.restart,
            validation: None,
        })
    }

    async fn rollback_target(
        &self,
        project: &str,
        current: Option<&Release>,
        requested: Option<&str>,
    ) -> Result<Release, DeployError> {
        let not_found = |message: String| {
            DeployError::new(DeployErrorKind::ReleaseNotFound, message)
                .with_suggestion(format!("list releases with `hostkit releases --project={project}`"))
        };

        let target = match requested {
            Some(requested) => self
                .releases
                .get_release(project, requested)
                .await?
                .ok_or_else(|| not_found(format!("{project} has no release named {requested}")))?,
            None => {
                let current = current
                    .ok_or_else(|| not_found(format!("{project} has no current release")))?;
                self.releases
                    .list_releases(project)
                    .await?
                    .into_iter()
                    .filter(|r| r.id != current.id && r.activated_at.is_some())
                    .find(|r| (r.deployed_at, r.id) < (current.deployed_at, current.id))
                    .ok_or_else(|| not_found(format!("{project} has no release before {}", current.release_name)))?
            }
        };

        if self.releases.release_state(&target) == ReleaseState::Staged {
            return Err(not_found(format!(
                "{} was never activated and cannot be rolled back to",
                target.release_name
            )));
        }
        Ok(target)
    }

    async fn load_project(&self, project: &str) -> Result<Project, DeployError> {
        self.store.get_project(project).await?.ok_or_else(|| {
            DeployError::new(
                DeployErrorKind::ProjectNotFound,
                format!("Project {project} does not exist"),
            )
            .with_suggestion("create the project before deploying to it")
        })
    }

    async fn clone_source(&self, project: &Project, git: &GitSource) -> Result<(TempDir, GitRevision), DeployError> {
        let clone_failed = |message: String| {
            DeployError::new(DeployErrorKind::GitCloneFailed, message)
                .with_suggestion("check the repository URL, the ref and the server's git credentials")
        };

        let repo_url = git
            .repo_url
            .clone()
            .or_else(|| project.git_repo.clone())
            .ok_or_else(|| {
                DeployError::new(
                    DeployErrorKind::GitCloneFailed,
                    format!("No git repository configured for {}", project.name),
                )
                .with_suggestion("pass --repo=<url> or configure the project's git repository")
            })?;
        let git_ref = git
            .git_ref
            .clone()
            .or_else(|| project.git_branch.clone().map(GitRef::Branch));

        let dir = self
            .layout
            .tmp_dir()
            .temp_dir("clone-")
            .await
            .map_err(|e| clone_failed(format!("Failed to create clone directory: {e}")))?;

        let revision = self
            .collaborators
            .git
            .clone_to_directory(&repo_url, dir.path(), git_ref.as_ref())
            .await
            .map_err(|e| clone_failed(format!("Failed to clone {repo_url}: {e}")))?;

        info!(
            project = %project.name,
            commit = revision.commit.as_deref().unwrap_or("unknown"),
            "Cloned repository"
        );
        Ok((dir, revision))
    }

    async fn checkpoint(&self, project: &str, warnings: &mut Vec<String>) -> Option<String> {
        let deps = &self.collaborators;
        match deps.database.exists(project).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(project = %project, "Database presence check failed: {}", e);
                warnings.push(format!("database presence unknown: {e}"));
                return None;
            }
        }

        let label = format!("pre-deploy {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
        match deps
            .checkpoints
            .create_checkpoint(project, &label, CHECKPOINT_TYPE_PRE_DEPLOY, "deploy")
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(project = %project, "Checkpoint failed: {}", e);
                warnings.push(format!("checkpoint not created: {e}"));
                None
            }
        }
    }

    /// Point the supervisor at the start command the build type needs
    async fn reconcile_entry_point(&self, project: &Project, build_type: BuildType) -> Result<(), DeployError> {
        let wanted = build_type.entry_point();
        let applied = project.entry_point.as_deref();

        let change = match (wanted, applied) {
            (Some(wanted), applied) if applied != Some(wanted) => Some(Some(wanted)),
            // only undo overrides this engine put in place
            (None, Some(STANDALONE_ENTRY_POINT)) => Some(None),
            _ => None,
        };
        let Some(command) = change else {
            return Ok(());
        };

        info!(project = %project.name, entry_point = ?command, "Reconfiguring service entry point");
        self.collaborators
            .service
            .set_entry_point(&project.name, command)
            .await
            .map_err(|e| {
                DeployError::new(
                    DeployErrorKind::ServiceStartFailed,
                    format!("Failed to update the service entry point: {e}"),
                )
            })?;
        self.store.set_project_entry_point(&project.name, command).await?;
        Ok(())
    }

    async fn restart(&self, project: &str) -> Result<(), DeployError> {
        self.collaborators.service.restart(project).await.map_err(|e| {
            DeployError::new(
                DeployErrorKind::ServiceStartFailed,
                format!("Failed to restart {project}: {e}"),
            )
            .with_suggestion(format!(
                "inspect `journalctl -u {}{project}` and restart once fixed",
                self.settings.deploy.unit_prefix
            ))
        })
    }

    async fn validate(&self, project: &str) -> ValidationReport {
        let policy = ValidationPolicy {
            interval: Duration::from_millis(self.settings.deploy.validation_interval_ms),
            timeout: Duration::from_secs(self.settings.deploy.validation_timeout_secs),
            log_lines: self.settings.deploy.validation_log_lines,
        };
        validate_service(self.collaborators.service.as_ref(), project, policy).await
    }

    fn attempt(
        &self,
        project: &str,
        opts: &DeployOptions,
        source_type: SourceType,
        files_synced: u64,
        started: Instant,
        error: Option<&DeployError>,
    ) -> NewDeployAttempt {
        NewDeployAttempt {
            project_name: project.to_string(),
            deployed_at: Utc::now(),
            deployed_by: opts.actor.clone(),
            success: error.is_none(),
            duration_ms: elapsed_ms(started),
            source_type,
            files_synced,
            override_used: opts.override_ratelimit,
            error_message: error.map(|e| e.to_string()),
        }
    }

    async fn record_failure(
        &self,
        project: &str,
        opts: &DeployOptions,
        source_type: SourceType,
        files_synced: u64,
        started: Instant,
        err: &DeployError,
    ) {
        let attempt = self.attempt(project, opts, source_type, files_synced, started, Some(err));
        if let Err(e) = self.rate_limiter.record_deploy(&attempt).await {
            error!(project = %project, "Failed to record failed deploy attempt: {}", e);
        }
    }
}
